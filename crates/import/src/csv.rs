use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tcat_core::record::calendar_date;
use tcat_core::{Money, Record, RecordCollection, UnvalidatedRecord, ValidationError};
use thiserror::Error;
use tracing::{debug, info};

const DATE_HEADERS: &[&str] = &["date"];
const DESC_HEADERS: &[&str] = &["desc", "description", "memo", "name"];
const AMOUNT_HEADERS: &[&str] = &["amt", "amount"];
const BALANCE_HEADERS: &[&str] = &["bal", "balance"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvImportProfile {
    /// Inferred from the file name when absent.
    pub bank: Option<String>,
    /// Inferred from the file name when absent.
    pub account: Option<String>,
    pub delimiter: String,
    /// Opening balance for files without a balance column.
    pub start_balance: Option<Money>,
    /// Balance after the latest row, for files without a balance column.
    /// Exclusive with `start_balance`.
    pub end_balance: Option<Money>,
}

impl Default for CsvImportProfile {
    fn default() -> Self {
        Self {
            bank: None,
            account: None,
            delimiter: ",".to_string(),
            start_balance: None,
            end_balance: None,
        }
    }
}

/// Where a computed running balance is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BalanceAnchor {
    Start(Money),
    End(Money),
}

impl CsvImportProfile {
    fn balance_anchor(&self) -> Result<BalanceAnchor, CsvError> {
        match (self.start_balance, self.end_balance) {
            (Some(_), Some(_)) => Err(CsvError::ConflictingBalances),
            (None, Some(end)) => Ok(BalanceAnchor::End(end)),
            (start, None) => Ok(BalanceAnchor::Start(start.unwrap_or_default())),
        }
    }
}

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Missing required column: {0}")]
    MissingColumn(&'static str),
    #[error("Invalid date format: {0}")]
    InvalidDate(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Cannot infer bank and account from file name '{}'", .0.display())]
    InvalidFileName(PathBuf),
    #[error("Invalid record: {0}")]
    Validation(#[from] ValidationError),
    #[error("Path does not exist: {}", .0.display())]
    MissingPath(PathBuf),
    #[error("No CSV files in {}", .0.display())]
    NoCsvFiles(PathBuf),
    #[error("Only one of start_balance or end_balance may be given")]
    ConflictingBalances,
    #[error("Running balance leaves the accepted range on {0}")]
    BalanceOutOfRange(NaiveDate),
}

struct Columns {
    date: usize,
    desc: usize,
    amount: usize,
    balance: Option<usize>,
    width: usize,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, CsvError> {
        let find = |names: &[&str]| {
            names.iter().find_map(|name| {
                headers
                    .iter()
                    .position(|h| h.trim().eq_ignore_ascii_case(name))
            })
        };
        Ok(Self {
            date: find(DATE_HEADERS).ok_or(CsvError::MissingColumn("date"))?,
            desc: find(DESC_HEADERS).ok_or(CsvError::MissingColumn("description"))?,
            amount: find(AMOUNT_HEADERS).ok_or(CsvError::MissingColumn("amount"))?,
            balance: find(BALANCE_HEADERS),
            width: headers.len(),
        })
    }
}

struct Row {
    date: NaiveDate,
    desc: String,
    amount: Money,
    balance: Option<Money>,
    note: Option<String>,
}

fn parse_row(row: &csv::StringRecord, columns: &Columns) -> Result<Row, CsvError> {
    let field = |idx: usize| row.get(idx).unwrap_or_default();

    let extra: Vec<&str> = row.iter().skip(columns.width).collect();
    let note = if extra.iter().any(|f| !f.trim().is_empty()) {
        Some(format!("Additional CSV Data: {}", extra.join(", ")))
    } else {
        None
    };

    Ok(Row {
        date: parse_date(field(columns.date))?,
        desc: field(columns.desc).trim().to_string(),
        amount: parse_amount(field(columns.amount))?,
        balance: columns
            .balance
            .map(|idx| parse_amount(field(idx)))
            .transpose()?,
        note,
    })
}

/// `YYYY/MM/DD` and `YYYY-MM-DD` are detected by a four digit first part;
/// anything else is read as `MM/DD/YYYY`.
fn parse_date(s: &str) -> Result<NaiveDate, CsvError> {
    let s = s.trim();
    let invalid = || CsvError::InvalidDate(s.to_string());
    let separator = if s.contains('-') { '-' } else { '/' };

    let parts: Vec<&str> = s.split(separator).collect();
    let [first, second, third] = parts[..] else {
        return Err(invalid());
    };
    if [first, second, third]
        .iter()
        .any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()))
    {
        return Err(invalid());
    }
    let number = |p: &str| p.parse::<u32>().map_err(|_| invalid());

    let (year, month, day) = match (first.len(), separator) {
        (4, _) => (first, second, third),
        (_, '/') if third.len() == 4 => (third, first, second),
        _ => return Err(invalid()),
    };
    let year = i32::try_from(number(year)?).map_err(|_| invalid())?;
    calendar_date(year, number(month)?, number(day)?).map_err(CsvError::from)
}

fn parse_amount(s: &str) -> Result<Money, CsvError> {
    let trimmed = s.trim();
    let (negative, inner) = match trimmed.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };
    let cleaned = inner.replace([',', '$', ' '], "");
    let amount: Money = cleaned
        .parse()
        .map_err(|_| CsvError::InvalidAmount(trimmed.to_string()))?;
    Ok(if negative { -amount } else { amount })
}

/// Parses one CSV export into records for `bank`/`account`.
pub fn import_csv<R: Read>(
    data: R,
    bank: &str,
    account: &str,
    profile: &CsvImportProfile,
) -> Result<RecordCollection, CsvError> {
    let delimiter = profile
        .delimiter
        .as_bytes()
        .first()
        .copied()
        .unwrap_or(b',');
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(data);

    let columns = Columns::from_headers(reader.headers()?)?;
    let mut rows = Vec::new();
    for result in reader.records() {
        let row = result?;
        if row.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        rows.push(parse_row(&row, &columns)?);
    }

    if columns.balance.is_none() {
        fill_running_balance(&mut rows, profile.balance_anchor()?)?;
    }

    let records = rows
        .into_iter()
        .map(|row| {
            Record::validate(UnvalidatedRecord {
                account: account.to_string(),
                amount: row.amount,
                balance: row.balance.unwrap_or_default(),
                bank: bank.to_string(),
                date: row.date,
                desc: row.desc,
                name: None,
                note: row.note,
                tags: Vec::new(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    debug!("Parsed {} records for {}/{}", records.len(), bank, account);
    Ok(RecordCollection::new(records))
}

/// Balance after each row in date order, counted forward from an opening
/// balance or backward from the balance after the latest row.
fn fill_running_balance(rows: &mut [Row], anchor: BalanceAnchor) -> Result<(), CsvError> {
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by_key(|&i| rows[i].date);

    match anchor {
        BalanceAnchor::Start(start) => {
            let mut balance = start;
            for i in order {
                balance = balance
                    .checked_add(rows[i].amount)
                    .ok_or(CsvError::BalanceOutOfRange(rows[i].date))?;
                rows[i].balance = Some(balance);
            }
        }
        BalanceAnchor::End(end) => {
            let mut balance = end;
            for i in order.into_iter().rev() {
                rows[i].balance = Some(balance);
                balance = balance
                    .checked_sub(rows[i].amount)
                    .ok_or(CsvError::BalanceOutOfRange(rows[i].date))?;
            }
        }
    }
    Ok(())
}

/// Resolves bank and account for `path`, filling whatever the profile leaves
/// out from a `{bank}-{account}.csv` file name.
fn source_names(path: &Path, profile: &CsvImportProfile) -> Result<(String, String), CsvError> {
    if let (Some(bank), Some(account)) = (&profile.bank, &profile.account) {
        return Ok((bank.clone(), account.clone()));
    }
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CsvError::InvalidFileName(path.to_path_buf()))?;

    match (&profile.bank, &profile.account) {
        (Some(bank), None) => Ok((bank.clone(), stem.to_string())),
        (None, Some(account)) => Ok((stem.to_string(), account.clone())),
        _ => match stem.split_once('-') {
            Some((bank, account)) if !bank.is_empty() && !account.is_empty() => {
                Ok((bank.to_string(), account.to_string()))
            }
            _ => Err(CsvError::InvalidFileName(path.to_path_buf())),
        },
    }
}

pub fn import_file(path: &Path, profile: &CsvImportProfile) -> Result<RecordCollection, CsvError> {
    let (bank, account) = source_names(path, profile)?;
    let file = fs::File::open(path)?;
    import_csv(file, &bank, &account, profile)
}

/// Imports a single CSV file, or every `*.csv` in a directory (in file name
/// order) merged into one collection.
pub fn import_path(path: &Path, profile: &CsvImportProfile) -> Result<RecordCollection, CsvError> {
    if path.is_file() {
        return import_file(path, profile);
    }
    if !path.is_dir() {
        return Err(CsvError::MissingPath(path.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(path)? {
        let file = entry?.path();
        let is_csv = file
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if is_csv && file.is_file() {
            files.push(file);
        }
    }
    if files.is_empty() {
        return Err(CsvError::NoCsvFiles(path.to_path_buf()));
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let collections = files
        .iter()
        .map(|file| import_file(file, profile))
        .collect::<Result<Vec<_>, _>>()?;
    let merged = RecordCollection::merge(collections);
    info!(
        "Imported {} records from {} CSV files in {}",
        merged.len(),
        files.len(),
        path.display()
    );
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // ── parse_amount ──────────────────────────────────────────────────────────

    #[test]
    fn parse_amount_plain() {
        assert_eq!(parse_amount("123.45").unwrap(), Money::from_cents(12345));
    }

    #[test]
    fn parse_amount_with_dollar_sign_and_commas() {
        assert_eq!(parse_amount("$1,234.56").unwrap(), Money::from_cents(123456));
    }

    #[test]
    fn parse_amount_negative() {
        assert_eq!(parse_amount("-50.00").unwrap(), Money::from_cents(-5000));
    }

    #[test]
    fn parse_amount_accounting_parens() {
        assert_eq!(parse_amount("($75.25)").unwrap(), Money::from_cents(-7525));
    }

    #[test]
    fn parse_amount_invalid() {
        assert!(parse_amount("not_a_number").is_err());
        assert!(parse_amount("").is_err());
    }

    // ── parse_date ────────────────────────────────────────────────────────────

    #[test]
    fn parse_date_year_first_slash() {
        assert_eq!(parse_date("2021/03/04").unwrap(), date(2021, 3, 4));
    }

    #[test]
    fn parse_date_us_slash() {
        assert_eq!(parse_date("03/04/2021").unwrap(), date(2021, 3, 4));
    }

    #[test]
    fn parse_date_iso() {
        assert_eq!(parse_date("2024-01-15").unwrap(), date(2024, 1, 15));
    }

    #[test]
    fn parse_date_invalid() {
        assert!(matches!(parse_date("not-a-date"), Err(CsvError::InvalidDate(_))));
        assert!(matches!(parse_date("2021/03"), Err(CsvError::InvalidDate(_))));
        assert!(matches!(parse_date("03-04-2021"), Err(CsvError::InvalidDate(_))));
    }

    #[test]
    fn parse_date_impossible_day() {
        assert!(matches!(
            parse_date("2021/02/30"),
            Err(CsvError::Validation(ValidationError::InvalidDate(_)))
        ));
        assert!(matches!(
            parse_date("02/29/2021"),
            Err(CsvError::Validation(ValidationError::InvalidDate(_)))
        ));
        assert_eq!(parse_date("2/29/2020").unwrap(), date(2020, 2, 29));
    }

    // ── import ────────────────────────────────────────────────────────────────

    #[test]
    fn import_csv_basic() {
        let data = b"Date,Description,Amount,Balance\n\
            2021/03/04,PIZZA PLANET 0123,($25.00),\"$1,475.00\"\n\
            03/05/2021,PAYROLL,2500.00,3975.00\n";
        let c = import_csv(data.as_ref(), "chase", "checking", &CsvImportProfile::default())
            .unwrap();
        assert_eq!(c.len(), 2);
        let first = c.get(0).unwrap();
        assert_eq!(first.bank(), "chase");
        assert_eq!(first.account(), "checking");
        assert_eq!(first.date(), date(2021, 3, 4));
        assert_eq!(first.amount(), Money::from_cents(-2500));
        assert_eq!(first.balance(), Money::from_cents(147500));
        assert!(!first.is_categorized());
        assert_eq!(c.get(1).unwrap().date(), date(2021, 3, 5));
    }

    #[test]
    fn short_header_names_are_recognized() {
        let data = b"DATE,DESC,AMT,BAL\n2021/01/02,COFFEE,-3.50,96.50\n";
        let c = import_csv(data.as_ref(), "b", "a", &CsvImportProfile::default()).unwrap();
        assert_eq!(c.get(0).unwrap().desc(), "COFFEE");
        assert_eq!(c.get(0).unwrap().balance(), Money::from_cents(9650));
    }

    #[test]
    fn surplus_fields_become_note() {
        let data = b"date,desc,amount,balance\n2021/01/02,COFFEE,-3.50,96.50,card 1234,pos\n";
        let c = import_csv(data.as_ref(), "b", "a", &CsvImportProfile::default()).unwrap();
        assert_eq!(
            c.get(0).unwrap().note(),
            Some("Additional CSV Data: card 1234, pos")
        );
    }

    #[test]
    fn missing_balance_column_uses_running_balance() {
        let data = b"date,desc,amount\n2021/01/03,LATER,-10.00\n2021/01/01,FIRST,100.00\n";
        let profile = CsvImportProfile {
            start_balance: Some(Money::from_cents(5000)),
            ..Default::default()
        };
        let c = import_csv(data.as_ref(), "b", "a", &profile).unwrap();
        assert_eq!(c.get(0).unwrap().balance(), Money::from_cents(14000));
        assert_eq!(c.get(1).unwrap().balance(), Money::from_cents(15000));
    }

    #[test]
    fn end_balance_counts_backward_from_latest_row() {
        let data = b"date,desc,amount
            2021/01/03,LATER,-10.00
            2021/01/01,FIRST,100.00
            2021/01/02,MIDDLE,-5.00
";
        let profile = CsvImportProfile {
            end_balance: Some(Money::from_cents(20000)),
            ..Default::default()
        };
        let c = import_csv(data.as_ref(), "b", "a", &profile).unwrap();
        let balances: Vec<Money> = c.iter().map(Record::balance).collect();
        assert_eq!(
            balances,
            vec![
                Money::from_cents(20000),
                Money::from_cents(21500),
                Money::from_cents(21000)
            ]
        );
    }

    #[test]
    fn start_and_end_balance_conflict() {
        let data = b"date,desc,amount
2021/01/01,X,1.00
";
        let profile = CsvImportProfile {
            start_balance: Some(Money::zero()),
            end_balance: Some(Money::zero()),
            ..Default::default()
        };
        assert!(matches!(
            import_csv(data.as_ref(), "b", "a", &profile),
            Err(CsvError::ConflictingBalances)
        ));
    }

    #[test]
    fn running_balance_beyond_limit_errors() {
        let data = b"date,desc,amount
            2021/01/01,A,1000000000000000
            2021/01/02,B,1000000000000000
";
        assert!(matches!(
            import_csv(data.as_ref(), "b", "a", &CsvImportProfile::default()),
            Err(CsvError::BalanceOutOfRange(d)) if d == date(2021, 1, 2)
        ));
        let huge = b"date,desc,amount
2021/01/01,A,79228162514264337593543950335
";
        assert!(matches!(
            import_csv(huge.as_ref(), "b", "a", &CsvImportProfile::default()),
            Err(CsvError::InvalidAmount(_))
        ));
    }

    #[test]
    fn missing_amount_column_errors() {
        let data = b"date,desc\n2021/01/01,X\n";
        let result = import_csv(data.as_ref(), "b", "a", &CsvImportProfile::default());
        assert!(matches!(result, Err(CsvError::MissingColumn("amount"))));
    }

    #[test]
    fn semicolon_delimiter() {
        let data = b"date;desc;amount;balance\n2021/01/01;X;1,00;2\n";
        let profile = CsvImportProfile {
            delimiter: ";".to_string(),
            ..Default::default()
        };
        // "1,00" loses the comma as a thousands separator.
        let c = import_csv(data.as_ref(), "b", "a", &profile).unwrap();
        assert_eq!(c.get(0).unwrap().amount(), Money::from_cents(10000));
    }

    #[test]
    fn bank_and_account_from_file_name() {
        let profile = CsvImportProfile::default();
        assert_eq!(
            source_names(Path::new("/tmp/chase-joint-checking.csv"), &profile).unwrap(),
            ("chase".to_string(), "joint-checking".to_string())
        );
        assert!(matches!(
            source_names(Path::new("/tmp/statement.csv"), &profile),
            Err(CsvError::InvalidFileName(_))
        ));

        let bank_only = CsvImportProfile {
            bank: Some("ally".to_string()),
            ..Default::default()
        };
        assert_eq!(
            source_names(Path::new("savings.csv"), &bank_only).unwrap(),
            ("ally".to_string(), "savings".to_string())
        );
    }

    #[test]
    fn import_directory_merges_in_date_order() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("chase-checking.csv"),
            "date,desc,amount,balance\n2021/02/01,B,-1.00,9.00\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("ally-savings.csv"),
            "date,desc,amount,balance\n2021/01/01,A,10.00,10.00\n",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let c = import_path(dir.path(), &CsvImportProfile::default()).unwrap();
        let banks: Vec<&str> = c.iter().map(Record::bank).collect();
        assert_eq!(banks, vec!["ally", "chase"]);
    }

    #[test]
    fn import_directory_without_csv_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            import_path(dir.path(), &CsvImportProfile::default()),
            Err(CsvError::NoCsvFiles(_))
        ));
        assert!(matches!(
            import_path(&dir.path().join("missing"), &CsvImportProfile::default()),
            Err(CsvError::MissingPath(_))
        ));
    }
}
