use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use super::money::Money;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Tags must be non-empty strings")]
    EmptyTag,
    #[error("Value for {0} is outside the accepted range")]
    AmountOutOfRange(&'static str),
    #[error("Invalid calendar date: {0}")]
    InvalidDate(String),
    #[error("Field {0} must not be empty")]
    EmptyField(&'static str),
}

/// Builds a calendar date, rejecting impossible combinations like February 30th.
pub fn calendar_date(year: i32, month: u32, day: u32) -> Result<NaiveDate, ValidationError> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| ValidationError::InvalidDate(format!("{year:04}-{month:02}-{day:02}")))
}

/// Raw record fields as handed over by a parser, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnvalidatedRecord {
    pub account: String,
    pub amount: Money,
    pub balance: Money,
    pub bank: String,
    pub date: NaiveDate,
    pub desc: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One bank transaction.
///
/// `desc` is fixed at construction. `name` and `tags` change only through
/// [`Record::apply_category`]; `note` belongs to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UnvalidatedRecord")]
pub struct Record {
    account: String,
    amount: Money,
    balance: Money,
    bank: String,
    date: NaiveDate,
    desc: String,
    name: Option<String>,
    note: Option<String>,
    tags: BTreeSet<String>,
}

/// Fields that identify the same bank transaction across exports.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub account: String,
    pub amount: Money,
    pub balance: Money,
    pub bank: String,
    pub date: NaiveDate,
    pub desc: String,
}

impl Record {
    pub fn validate(raw: UnvalidatedRecord) -> Result<Record, ValidationError> {
        if raw.account.trim().is_empty() {
            return Err(ValidationError::EmptyField("account"));
        }
        if raw.bank.trim().is_empty() {
            return Err(ValidationError::EmptyField("bank"));
        }
        if !raw.amount.is_within_limit() {
            return Err(ValidationError::AmountOutOfRange("amount"));
        }
        if !raw.balance.is_within_limit() {
            return Err(ValidationError::AmountOutOfRange("balance"));
        }
        let tags = validate_tags(raw.tags)?;

        Ok(Record {
            account: raw.account,
            amount: raw.amount,
            balance: raw.balance,
            bank: raw.bank,
            date: raw.date,
            desc: raw.desc,
            name: raw.name.filter(|n| !n.is_empty()),
            note: raw.note,
            tags,
        })
    }

    /// Shorthand for an uncategorized record.
    pub fn new(
        account: &str,
        bank: &str,
        date: NaiveDate,
        desc: &str,
        amount: Money,
        balance: Money,
    ) -> Result<Record, ValidationError> {
        Record::validate(UnvalidatedRecord {
            account: account.to_string(),
            amount,
            balance,
            bank: bank.to_string(),
            date,
            desc: desc.to_string(),
            name: None,
            note: None,
            tags: Vec::new(),
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    pub fn bank(&self) -> &str {
        &self.bank
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn is_categorized(&self) -> bool {
        self.name.is_some() || !self.tags.is_empty()
    }

    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }

    pub fn has_note(&self) -> bool {
        self.note.as_deref().is_some_and(|n| !n.is_empty())
    }

    pub fn set_note(&mut self, note: Option<String>) {
        self.note = note;
    }

    /// Sets the display name and tag set. With `merge` the new tags are
    /// unioned into the existing ones, otherwise they replace them. A `None`
    /// name keeps the current one.
    pub fn apply_category<I, S>(
        &mut self,
        name: Option<&str>,
        tags: I,
        merge: bool,
    ) -> Result<(), ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = validate_tags(tags.into_iter().map(Into::<String>::into))?;
        if !merge {
            self.tags.clear();
        }
        self.tags.extend(tags);
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            self.name = Some(name.to_string());
        }
        Ok(())
    }

    pub(crate) fn replace_category(
        &mut self,
        name: Option<String>,
        note: Option<String>,
        tags: BTreeSet<String>,
    ) {
        self.name = name;
        self.note = note;
        self.tags = tags;
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            account: self.account.clone(),
            amount: self.amount,
            balance: self.balance,
            bank: self.bank.clone(),
            date: self.date,
            desc: self.desc.clone(),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} {:>12} {}",
            self.date,
            self.bank,
            self.account,
            self.amount.to_string(),
            self.name.as_deref().unwrap_or(&self.desc)
        )?;
        if !self.tags.is_empty() {
            let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
            write!(f, " [{}]", tags.join(", "))?;
        }
        Ok(())
    }
}

impl TryFrom<UnvalidatedRecord> for Record {
    type Error = ValidationError;

    fn try_from(raw: UnvalidatedRecord) -> Result<Self, Self::Error> {
        Record::validate(raw)
    }
}

fn validate_tags<I: IntoIterator<Item = String>>(tags: I) -> Result<BTreeSet<String>, ValidationError> {
    tags.into_iter()
        .map(|t| {
            if t.trim().is_empty() {
                Err(ValidationError::EmptyTag)
            } else {
                Ok(t)
            }
        })
        .collect()
}
