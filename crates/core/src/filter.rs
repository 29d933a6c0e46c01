use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use super::collection::RecordView;
use super::money::Money;
use super::period::DateFilter;
use super::record::Record;

/// Inclusive bounds on a currency value; a missing bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyRange {
    pub min: Option<Money>,
    pub max: Option<Money>,
}

impl MoneyRange {
    pub fn new(min: Option<Money>, max: Option<Money>) -> Self {
        MoneyRange { min, max }
    }

    pub fn contains(self, value: Money) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// `amount > 0`
    Deposit,
    /// `amount < 0`
    Withdrawal,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "+" | "d" | "deposit" => Ok(Direction::Deposit),
            "-" | "w" | "withdrawal" => Ok(Direction::Withdrawal),
            other => Err(format!("Unknown direction: '{other}'")),
        }
    }
}

/// Named constraints for [`RecordView::filter`]. Every supplied constraint
/// must hold for a record to be kept; absent ones are ignored.
///
/// With `negate` set, a record is kept only when every supplied constraint
/// fails instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    /// Exact, case-sensitive.
    pub account: Option<String>,
    /// Exact, case-sensitive.
    pub bank: Option<String>,
    pub date: Option<DateFilter>,
    /// The record must carry all of these.
    pub tags: BTreeSet<String>,
    pub amount: Option<MoneyRange>,
    pub balance: Option<MoneyRange>,
    pub direction: Option<Direction>,
    /// Case-insensitive substring of the display name.
    pub name: Option<String>,
    /// Case-insensitive substring of the raw description.
    pub desc: Option<String>,
    /// Case-insensitive substring of the user note.
    pub note: Option<String>,
    pub negate: bool,
}

impl FilterSpec {
    pub fn is_empty(&self) -> bool {
        self.account.is_none()
            && self.bank.is_none()
            && self.date.is_none()
            && self.tags.is_empty()
            && self.amount.is_none()
            && self.balance.is_none()
            && self.direction.is_none()
            && self.name.is_none()
            && self.desc.is_none()
            && self.note.is_none()
    }

    fn matches(&self, record: &Record, latest: Option<chrono::NaiveDate>) -> bool {
        let mut outcomes: Vec<bool> = Vec::new();

        if let Some(account) = &self.account {
            outcomes.push(record.account() == account);
        }
        if let Some(bank) = &self.bank {
            outcomes.push(record.bank() == bank);
        }
        if let Some(date) = self.date {
            // `latest` is only absent for an empty view, which never reaches here.
            outcomes.push(latest.is_some_and(|latest| date.matches(record.date(), latest)));
        }
        if !self.tags.is_empty() {
            outcomes.push(self.tags.iter().all(|t| record.has_tag(t)));
        }
        if let Some(range) = self.amount {
            outcomes.push(range.contains(record.amount()));
        }
        if let Some(range) = self.balance {
            outcomes.push(range.contains(record.balance()));
        }
        if let Some(direction) = self.direction {
            outcomes.push(match direction {
                Direction::Deposit => record.amount().is_positive(),
                Direction::Withdrawal => record.amount().is_negative(),
            });
        }
        if let Some(needle) = &self.name {
            outcomes.push(contains_ci(record.name(), needle));
        }
        if let Some(needle) = &self.desc {
            outcomes.push(contains_ci(Some(record.desc()), needle));
        }
        if let Some(needle) = &self.note {
            outcomes.push(contains_ci(record.note(), needle));
        }

        if self.negate {
            outcomes.iter().all(|held| !held)
        } else {
            outcomes.iter().all(|held| *held)
        }
    }
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(&needle.to_lowercase()))
}

impl<'a> RecordView<'a> {
    /// Keeps the records matching `spec`, in their current relative order.
    /// "Last N days" windows are measured from the latest date in this view.
    pub fn filter(&self, spec: &FilterSpec) -> RecordView<'a> {
        let latest = self.latest_date();
        let indices = self
            .indexed()
            .filter(|(_, r)| spec.matches(r, latest))
            .map(|(i, _)| i)
            .collect();
        self.with_indices(indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::tests::{date, record, sample};
    use crate::collection::RecordCollection;
    use crate::period::DateRange;

    fn descs(view: &RecordView<'_>) -> Vec<String> {
        view.iter().map(|r| r.desc().to_string()).collect()
    }

    #[test]
    fn empty_spec_keeps_everything_in_order() {
        let c = sample();
        let spec = FilterSpec::default();
        assert!(spec.is_empty());
        let v = c.filter(&spec);
        assert_eq!(v.indices(), &[0, 1, 2, 3]);
    }

    #[test]
    fn filter_never_mutates_source() {
        let c = sample();
        let before = c.clone();
        let spec = FilterSpec {
            bank: Some("chase".to_string()),
            ..Default::default()
        };
        let _ = c.filter(&spec);
        assert_eq!(c, before);
    }

    #[test]
    fn account_and_bank_are_exact_and_case_sensitive() {
        let c = sample();
        let spec = FilterSpec {
            account: Some("checking".to_string()),
            bank: Some("chase".to_string()),
            ..Default::default()
        };
        assert_eq!(descs(&c.filter(&spec)), vec!["PIZZA PLANET", "PAYROLL"]);

        let upper = FilterSpec {
            bank: Some("CHASE".to_string()),
            ..Default::default()
        };
        assert!(c.filter(&upper).is_empty());
    }

    #[test]
    fn tags_require_all() {
        let c = sample();
        let spec = FilterSpec {
            tags: ["food".to_string(), "subs".to_string()].into(),
            ..Default::default()
        };
        assert_eq!(descs(&c.filter(&spec)), vec!["SUB SHOP"]);

        let single = FilterSpec {
            tags: ["food".to_string()].into(),
            ..Default::default()
        };
        assert_eq!(descs(&c.filter(&single)), vec!["PIZZA PLANET", "SUB SHOP"]);
    }

    #[test]
    fn last_n_days_relative_to_latest_record() {
        let mut records = Vec::new();
        let mut d = date(2021, 1, 1);
        while d <= date(2021, 4, 1) {
            records.push(record("chase", "checking", d, "DAILY", -100, &[]));
            d = d.succ_opt().unwrap();
        }
        let c = RecordCollection::new(records);
        let spec = FilterSpec {
            date: Some(DateFilter::LastDays(90)),
            ..Default::default()
        };
        let v = c.filter(&spec);
        assert!(v.iter().all(|r| (date(2021, 4, 1) - r.date()).num_days() <= 90));
        assert_eq!(v.len(), 91);
        assert_eq!(v.get(0).unwrap().date(), date(2021, 1, 1));

        let spec = FilterSpec {
            date: Some(DateFilter::LastDays(30)),
            ..Default::default()
        };
        assert_eq!(c.filter(&spec).get(0).unwrap().date(), date(2021, 3, 2));
    }

    #[test]
    fn explicit_date_range_is_inclusive() {
        let c = sample();
        let spec = FilterSpec {
            date: Some(DateFilter::Range(DateRange::new(date(2021, 2, 20), date(2021, 3, 1)))),
            ..Default::default()
        };
        assert_eq!(descs(&c.filter(&spec)), vec!["SUB SHOP", "PAYROLL"]);
    }

    #[test]
    fn amount_range_and_direction() {
        let c = sample();
        let spec = FilterSpec {
            amount: Some(MoneyRange::new(Some(Money::from_cents(-2500)), Some(Money::from_cents(-1100)))),
            ..Default::default()
        };
        assert_eq!(descs(&c.filter(&spec)), vec!["PIZZA PLANET", "SUB SHOP"]);

        let deposits = FilterSpec {
            direction: Some(Direction::Deposit),
            ..Default::default()
        };
        assert_eq!(descs(&c.filter(&deposits)), vec!["INTEREST", "PAYROLL"]);
    }

    #[test]
    fn balance_range_open_ended() {
        let c = sample();
        let spec = FilterSpec {
            balance: Some(MoneyRange::new(Some(Money::from_cents(100_000)), None)),
            ..Default::default()
        };
        assert_eq!(descs(&c.filter(&spec)), vec!["INTEREST", "PAYROLL"]);
    }

    #[test]
    fn substring_constraints_are_case_insensitive() {
        let mut c = sample();
        c.get_mut(1).unwrap().set_note(Some("Quarterly INTEREST".to_string()));
        let spec = FilterSpec {
            desc: Some("pizza".to_string()),
            ..Default::default()
        };
        assert_eq!(descs(&c.filter(&spec)), vec!["PIZZA PLANET"]);

        let note = FilterSpec {
            note: Some("quarterly".to_string()),
            ..Default::default()
        };
        assert_eq!(descs(&c.filter(&note)), vec!["INTEREST"]);

        let name = FilterSpec {
            name: Some("anything".to_string()),
            ..Default::default()
        };
        assert!(c.filter(&name).is_empty());
    }

    #[test]
    fn negate_keeps_records_failing_every_constraint() {
        let c = sample();
        let spec = FilterSpec {
            bank: Some("chase".to_string()),
            negate: true,
            ..Default::default()
        };
        assert_eq!(descs(&c.filter(&spec)), vec!["SUB SHOP"]);
    }

    #[test]
    fn filters_chain_on_views() {
        let c = sample();
        let chase = c.filter(&FilterSpec {
            bank: Some("chase".to_string()),
            ..Default::default()
        });
        let food = chase.filter(&FilterSpec {
            tags: ["food".to_string()].into(),
            ..Default::default()
        });
        assert_eq!(food.indices(), &[0]);
    }

    #[test]
    fn direction_from_str() {
        assert_eq!("w".parse::<Direction>(), Ok(Direction::Withdrawal));
        assert_eq!("Deposit".parse::<Direction>(), Ok(Direction::Deposit));
        assert!("sideways".parse::<Direction>().is_err());
    }
}
