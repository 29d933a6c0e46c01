use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tcat_core::{
    DateFilter, DateRange, Direction, FilterSpec, GroupBy, Money, MoneyRange, RecordCollection,
    RecordView, SortKey, Statistics,
};
use tcat_import::{CategorizeSummary, CsvImportProfile, RuleDatabase};
use tracing::{info, warn};

use crate::settings::Settings;

/// Where records come from and how they are categorized.
#[derive(Debug, Args)]
pub struct ImportArgs {
    /// CSV files, directories of `{bank}-{account}.csv` exports, or `.json`
    /// files written by `tcat export`
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// Bank name, instead of inferring it from file names
    #[arg(long)]
    pub bank: Option<String>,
    /// Account name, instead of inferring it from file names
    #[arg(long)]
    pub account: Option<String>,
    /// Rule file or directory
    #[arg(short, long)]
    pub rules: Option<PathBuf>,
    /// Replace existing tags on matched records instead of merging
    #[arg(long)]
    pub replace_tags: bool,
}

#[derive(Debug, Default, Args)]
pub struct FilterArgs {
    #[arg(long = "filter-account")]
    pub filter_account: Option<String>,
    #[arg(long = "filter-bank")]
    pub filter_bank: Option<String>,
    /// `YYYY`, `YYYY/MM`, `YYYY/MM/DD` or `FROM..TO`
    #[arg(long, conflicts_with = "last")]
    pub date: Option<DateRange>,
    /// Only the last N days before the latest record
    #[arg(long)]
    pub last: Option<u32>,
    /// Required tag (repeatable; all must be present)
    #[arg(short, long = "tag")]
    pub tags: Vec<String>,
    #[arg(long, allow_hyphen_values = true)]
    pub min_amount: Option<Money>,
    #[arg(long, allow_hyphen_values = true)]
    pub max_amount: Option<Money>,
    #[arg(long, allow_hyphen_values = true)]
    pub min_balance: Option<Money>,
    #[arg(long, allow_hyphen_values = true)]
    pub max_balance: Option<Money>,
    /// `deposit` (`+`) or `withdrawal` (`-`)
    #[arg(long, allow_hyphen_values = true)]
    pub direction: Option<Direction>,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub desc: Option<String>,
    #[arg(long)]
    pub note: Option<String>,
    /// Keep records failing every given constraint instead
    #[arg(long)]
    pub negate: bool,
}

impl FilterArgs {
    pub fn spec(&self) -> FilterSpec {
        let range = |min: Option<Money>, max: Option<Money>| {
            (min.is_some() || max.is_some()).then(|| MoneyRange::new(min, max))
        };
        FilterSpec {
            account: self.filter_account.clone(),
            bank: self.filter_bank.clone(),
            date: match (self.last, self.date) {
                (Some(days), _) => Some(DateFilter::LastDays(days)),
                (None, Some(range)) => Some(DateFilter::Range(range)),
                (None, None) => None,
            },
            tags: self.tags.iter().cloned().collect(),
            amount: range(self.min_amount, self.max_amount),
            balance: range(self.min_balance, self.max_balance),
            direction: self.direction,
            name: self.name.clone(),
            desc: self.desc.clone(),
            note: self.note.clone(),
            negate: self.negate,
        }
    }
}

#[derive(Debug, Args)]
pub struct SortArgs {
    /// date, amount, balance, account, bank, desc or name
    #[arg(long, default_value = "date")]
    pub sort: SortKey,
    #[arg(long)]
    pub reverse: bool,
}

/// One line of `tcat group` output.
#[derive(Debug, Serialize)]
pub struct GroupSummary {
    pub key: String,
    pub count: usize,
    pub total: Money,
    pub mean: Money,
}

#[derive(Debug, Serialize)]
pub struct CategorizeOutput<'a> {
    pub summary: CategorizeSummary,
    pub coverage: f64,
    pub records: &'a RecordCollection,
}

fn load_rules(settings: &Settings, args: &ImportArgs) -> Result<RuleDatabase> {
    let Some(path) = settings.rules_path(args.rules.as_deref()) else {
        warn!("No rule location configured; records stay uncategorized");
        return Ok(RuleDatabase::default());
    };
    let explicit = args.rules.is_some() || settings.rules.is_some();
    if !explicit && !path.exists() {
        warn!(
            "Rule directory {} does not exist; records stay uncategorized",
            path.display()
        );
        return Ok(RuleDatabase::default());
    }
    tcat_import::import::load_rules(&path)
        .with_context(|| format!("Failed to load rules from {}", path.display()))
}

fn is_saved_collection(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Imports every path, merges them and categorizes the result.
pub fn load_records(
    settings: &Settings,
    args: &ImportArgs,
) -> Result<(RecordCollection, CategorizeSummary)> {
    let profile = CsvImportProfile {
        bank: args.bank.clone().or_else(|| settings.import.bank.clone()),
        account: args.account.clone().or_else(|| settings.import.account.clone()),
        ..settings.import.clone()
    };

    let collections = args
        .paths
        .iter()
        .map(|path| {
            if is_saved_collection(path) {
                return RecordCollection::load(path)
                    .with_context(|| format!("Failed to load saved records {}", path.display()));
            }
            tcat_import::import::import_csv_path(path, &profile)
                .with_context(|| format!("Failed to import {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    let mut records = RecordCollection::merge(collections);

    let mut options = settings.categorize.options();
    if args.replace_tags {
        options.policy = tcat_import::TagPolicy::Replace;
    }
    let categorizer = tcat_import::import::create_categorizer(load_rules(settings, args)?, options);
    info!(
        "Loaded {} rules from {} files",
        categorizer.database().rule_count(),
        categorizer.database().files().len()
    );
    let summary = categorizer.categorize(&mut records)?;
    Ok((records, summary))
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

pub fn categorize(records: &RecordCollection, summary: CategorizeSummary) -> Result<()> {
    // An empty import has nothing to cover.
    let coverage = records.view().coverage().unwrap_or(0.0);
    print_json(&CategorizeOutput {
        summary,
        coverage,
        records,
    })
}

pub fn filter(records: &RecordCollection, filter: &FilterArgs, sort: &SortArgs) -> Result<()> {
    let view = records.filter(&filter.spec()).sort(sort.sort, sort.reverse);
    info!("{} of {} records matched", view.len(), records.len());
    print_json(&view)
}

pub fn group_summaries(view: &RecordView<'_>, by: GroupBy) -> Result<Vec<GroupSummary>> {
    view.group(by)
        .into_iter()
        .map(|(key, members)| {
            Ok(GroupSummary {
                key: key.to_string(),
                count: members.len(),
                total: members.sum_amount(false)?,
                mean: members.mean_amount(false)?,
            })
        })
        .collect()
}

pub fn group(records: &RecordCollection, filter: &FilterArgs, by: GroupBy) -> Result<()> {
    let view = records.filter(&filter.spec());
    print_json(&group_summaries(&view, by)?)
}

pub fn stats(records: &RecordCollection, filter: &FilterArgs) -> Result<()> {
    let view = records.filter(&filter.spec());
    let statistics: Statistics = view
        .statistics()
        .context("No records left to summarize")?;
    print_json(&statistics)
}

/// Writes the filtered records to `output` as JSON.
pub fn export(records: &RecordCollection, filter: &FilterArgs, output: &Path) -> Result<()> {
    let selected = records.filter(&filter.spec()).to_collection();
    selected.save(output)?;
    info!("Exported {} records to {}", selected.len(), output.display());
    Ok(())
}

pub fn uncategorized(records: &RecordCollection, descs_only: bool) -> Result<()> {
    let view = records.view().uncategorized();
    if descs_only {
        print_json(&view.descs())
    } else {
        print_json(&view)
    }
}
