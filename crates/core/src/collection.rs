use chrono::NaiveDate;
use serde::ser::{Serialize, Serializer};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use super::filter::FilterSpec;
use super::group::{GroupBy, GroupKey};
use super::money::Money;
use super::record::Record;
use super::stats::EmptyCollectionError;

/// Owns the records of a session, in parser order.
///
/// Filtering, grouping and sorting hand out [`RecordView`]s, which hold
/// indices into this collection rather than copies of its records.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordCollection {
    records: Vec<Record>,
}

impl RecordCollection {
    pub fn new(records: Vec<Record>) -> Self {
        RecordCollection { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Record> {
        self.records.get_mut(index)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// A view over every record.
    pub fn view(&self) -> RecordView<'_> {
        RecordView {
            source: &self.records,
            indices: (0..self.records.len()).collect(),
        }
    }

    pub fn filter(&self, spec: &FilterSpec) -> RecordView<'_> {
        self.view().filter(spec)
    }

    pub fn group(&self, by: GroupBy) -> BTreeMap<GroupKey, RecordView<'_>> {
        self.view().group(by)
    }

    pub fn sort(&self, key: SortKey, reverse: bool) -> RecordView<'_> {
        self.view().sort(key, reverse)
    }

    pub fn sum_amount(&self, absolute_value: bool) -> Result<Money, EmptyCollectionError> {
        self.view().sum_amount(absolute_value)
    }

    pub fn mean_amount(&self, absolute_value: bool) -> Result<Money, EmptyCollectionError> {
        self.view().mean_amount(absolute_value)
    }

    pub fn max_amount(&self, absolute_value: bool) -> Result<Money, EmptyCollectionError> {
        self.view().max_amount(absolute_value)
    }

    pub fn min_amount(&self, absolute_value: bool) -> Result<Money, EmptyCollectionError> {
        self.view().min_amount(absolute_value)
    }

    pub fn accounts(&self) -> BTreeSet<&str> {
        self.records.iter().map(Record::account).collect()
    }

    pub fn banks(&self) -> BTreeSet<&str> {
        self.records.iter().map(Record::bank).collect()
    }

    /// Combines collections, collapsing records with the same
    /// [`Record::key`]. For duplicates, a later record's name, note and
    /// tags replace the earlier ones whenever it carries a value (or the
    /// earlier one does not). The result is ordered by date.
    pub fn merge<I>(collections: I) -> RecordCollection
    where
        I: IntoIterator<Item = RecordCollection>,
    {
        let mut merged: Vec<Record> = Vec::new();
        let mut seen = HashMap::new();

        for record in collections.into_iter().flat_map(RecordCollection::into_records) {
            match seen.get(&record.key()) {
                Some(&idx) => {
                    let existing: &mut Record = &mut merged[idx];
                    let name = if record.is_named() || !existing.is_named() {
                        record.name().map(str::to_string)
                    } else {
                        existing.name().map(str::to_string)
                    };
                    let note = if record.has_note() || !existing.has_note() {
                        record.note().map(str::to_string)
                    } else {
                        existing.note().map(str::to_string)
                    };
                    let tags = if !record.tags().is_empty() || existing.tags().is_empty() {
                        record.tags().clone()
                    } else {
                        existing.tags().clone()
                    };
                    existing.replace_category(name, note, tags);
                }
                None => {
                    seen.insert(record.key(), merged.len());
                    merged.push(record);
                }
            }
        }

        merged.sort_by_key(Record::date);
        RecordCollection::new(merged)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Writes the collection as JSON, replacing `path`.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let json = self.to_json().map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads a collection written by [`RecordCollection::save`]. Every record
    /// is validated again.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let json = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid record file {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl From<Vec<Record>> for RecordCollection {
    fn from(records: Vec<Record>) -> Self {
        RecordCollection::new(records)
    }
}

impl FromIterator<Record> for RecordCollection {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        RecordCollection::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a RecordCollection {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Read-only subset of a [`RecordCollection`], as positions into it.
#[derive(Debug, Clone)]
pub struct RecordView<'a> {
    pub(crate) source: &'a [Record],
    pub(crate) indices: Vec<usize>,
}

impl<'a> RecordView<'a> {
    pub(crate) fn with_indices(&self, indices: Vec<usize>) -> RecordView<'a> {
        RecordView {
            source: self.source,
            indices,
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Positions of the viewed records in the owning collection.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn get(&self, position: usize) -> Option<&'a Record> {
        self.indices.get(position).map(|&i| &self.source[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Record> + '_ {
        let source = self.source;
        self.indices.iter().map(move |&i| &source[i])
    }

    pub(crate) fn indexed(&self) -> impl Iterator<Item = (usize, &'a Record)> + '_ {
        let source = self.source;
        self.indices.iter().map(move |&i| (i, &source[i]))
    }

    /// Copies the viewed records into a new owned collection.
    pub fn to_collection(&self) -> RecordCollection {
        self.iter().cloned().collect()
    }

    pub fn sort(&self, key: SortKey, reverse: bool) -> RecordView<'a> {
        let mut indices = self.indices.clone();
        let source = self.source;
        indices.sort_by(|&a, &b| {
            let ord = key.compare(&source[a], &source[b]);
            if reverse {
                ord.reverse()
            } else {
                ord
            }
        });
        self.with_indices(indices)
    }

    pub fn uncategorized(&self) -> RecordView<'a> {
        let indices = self
            .indexed()
            .filter(|(_, r)| !r.is_categorized())
            .map(|(i, _)| i)
            .collect();
        self.with_indices(indices)
    }

    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.iter().map(Record::date).max()
    }

    pub fn earliest_date(&self) -> Option<NaiveDate> {
        self.iter().map(Record::date).min()
    }

    /// Distinct accounts, optionally limited to one bank (case-insensitive).
    pub fn accounts(&self, bank: Option<&str>) -> BTreeSet<&'a str> {
        self.iter()
            .filter(|r| bank.map_or(true, |b| r.bank().eq_ignore_ascii_case(b)))
            .map(Record::account)
            .collect()
    }

    pub fn banks(&self) -> BTreeSet<&'a str> {
        self.iter().map(Record::bank).collect()
    }

    pub fn names(&self) -> BTreeSet<&'a str> {
        self.iter().filter_map(Record::name).collect()
    }

    pub fn tags(&self) -> BTreeSet<&'a str> {
        self.iter()
            .flat_map(|r| r.tags().iter().map(String::as_str))
            .collect()
    }

    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.iter().map(Record::date).collect()
    }

    pub fn descs(&self) -> BTreeSet<&'a str> {
        self.iter().map(Record::desc).collect()
    }

    /// Records per display name; unnamed records count under `None`.
    pub fn counts(&self) -> BTreeMap<Option<&'a str>, usize> {
        let mut counts = BTreeMap::new();
        for record in self.iter() {
            *counts.entry(record.name()).or_insert(0) += 1;
        }
        counts
    }

    /// Percentage of categorized records, rounded to two places.
    pub fn coverage(&self) -> Result<f64, EmptyCollectionError> {
        if self.is_empty() {
            return Err(EmptyCollectionError);
        }
        let categorized = self.iter().filter(|r| r.is_categorized()).count();
        let pct = categorized as f64 / self.len() as f64 * 100.0;
        Ok((pct * 100.0).round() / 100.0)
    }
}

impl Serialize for RecordView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Date,
    Amount,
    Balance,
    Account,
    Bank,
    Desc,
    Name,
}

impl SortKey {
    fn compare(self, a: &Record, b: &Record) -> Ordering {
        match self {
            SortKey::Date => a.date().cmp(&b.date()),
            SortKey::Amount => a.amount().cmp(&b.amount()),
            SortKey::Balance => a.balance().cmp(&b.balance()),
            SortKey::Account => a.account().cmp(b.account()),
            SortKey::Bank => a.bank().cmp(b.bank()),
            SortKey::Desc => a.desc().cmp(b.desc()),
            SortKey::Name => a.name().cmp(&b.name()),
        }
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "date" => Ok(SortKey::Date),
            "amount" => Ok(SortKey::Amount),
            "balance" => Ok(SortKey::Balance),
            "account" => Ok(SortKey::Account),
            "bank" => Ok(SortKey::Bank),
            "desc" | "description" => Ok(SortKey::Desc),
            "name" => Ok(SortKey::Name),
            other => Err(format!("Unknown sort key: '{other}'")),
        }
    }
}
