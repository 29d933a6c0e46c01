use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tcat_core::{Record, RecordCollection, RecordView, ValidationError};
use tracing::{debug, info};

use crate::rules::{RuleDatabase, RuleMatch};

/// What happens to tags a record already carries when a rule matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagPolicy {
    /// Union of existing and matched tags.
    #[default]
    Merge,
    /// Existing tags are dropped first.
    Replace,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategorizeOptions {
    pub policy: TagPolicy,
    /// Added to every record a rule matches.
    pub extra_tags: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategorizeSummary {
    pub matched: usize,
    pub unmatched: usize,
    /// Records with an empty description.
    pub skipped: usize,
}

enum Outcome {
    Matched(Record),
    Unmatched,
    Skipped,
}

/// Applies a [`RuleDatabase`] to records.
///
/// Holds no mutable state, so one instance can serve several threads.
/// Running it twice over the same records gives the same names and tags as
/// running it once.
#[derive(Debug, Clone)]
pub struct Categorizer {
    database: RuleDatabase,
    options: CategorizeOptions,
}

impl Categorizer {
    pub fn new(database: RuleDatabase, options: CategorizeOptions) -> Self {
        Self { database, options }
    }

    pub fn database(&self) -> &RuleDatabase {
        &self.database
    }

    pub fn options(&self) -> &CategorizeOptions {
        &self.options
    }

    fn evaluate(&self, record: &Record) -> Result<Outcome, ValidationError> {
        if record.desc().trim().is_empty() {
            return Ok(Outcome::Skipped);
        }
        let Some(found) = self.database.find_match(record.desc()) else {
            return Ok(Outcome::Unmatched);
        };

        let tags = found
            .tags()
            .into_iter()
            .map(str::to_string)
            .chain(self.options.extra_tags.iter().cloned());
        let mut updated = record.clone();
        updated.apply_category(
            Some(found.name()),
            tags,
            self.options.policy == TagPolicy::Merge,
        )?;
        Ok(Outcome::Matched(updated))
    }

    /// Returns a categorized copy of `record`. Unmatched records come back
    /// unchanged.
    pub fn categorize_record(&self, record: &Record) -> Result<Record, ValidationError> {
        match self.evaluate(record)? {
            Outcome::Matched(updated) => Ok(updated),
            Outcome::Unmatched | Outcome::Skipped => Ok(record.clone()),
        }
    }

    /// Categorizes the stored records in place, keeping their order. Either
    /// every matched record is updated or, on error, none are.
    pub fn categorize(
        &self,
        collection: &mut RecordCollection,
    ) -> Result<CategorizeSummary, ValidationError> {
        let mut summary = CategorizeSummary::default();
        let mut updates = Vec::new();

        for (idx, record) in collection.iter().enumerate() {
            match self.evaluate(record)? {
                Outcome::Matched(updated) => {
                    summary.matched += 1;
                    updates.push((idx, updated));
                }
                Outcome::Unmatched => {
                    debug!("No rule matched '{}'", record.desc());
                    summary.unmatched += 1;
                }
                Outcome::Skipped => summary.skipped += 1,
            }
        }

        for (idx, updated) in updates {
            if let Some(slot) = collection.get_mut(idx) {
                *slot = updated;
            }
        }

        info!(
            "Categorized {} records: {} matched, {} unmatched, {} skipped",
            collection.len(),
            summary.matched,
            summary.unmatched,
            summary.skipped
        );
        Ok(summary)
    }

    /// Consuming form of [`Categorizer::categorize`].
    pub fn categorize_owned(
        &self,
        mut collection: RecordCollection,
    ) -> Result<RecordCollection, ValidationError> {
        self.categorize(&mut collection)?;
        Ok(collection)
    }

    /// Matches for the viewed records, as (collection index, match) pairs,
    /// without modifying anything.
    pub fn apply_rules<'a>(&'a self, view: &RecordView<'_>) -> Vec<(usize, RuleMatch<'a>)> {
        view.indices()
            .iter()
            .zip(view.iter())
            .filter(|(_, r)| !r.desc().trim().is_empty())
            .filter_map(|(&idx, r)| self.database.find_match(r.desc()).map(|m| (idx, m)))
            .collect()
    }
}
