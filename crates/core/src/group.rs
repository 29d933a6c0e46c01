use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::collection::RecordView;
use super::money::Money;
use super::period::{DateRange, Period};
use super::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Account,
    Bank,
    BankAccount,
    /// Exact transaction date.
    Date,
    /// Calendar bucket (`date-daily`, `date-weekly`, ...).
    Period(Period),
    Name,
    /// The full sorted tag set of each record.
    Tags,
    /// Fixed-width amount bins, lower bound inclusive.
    AmountBins(Money),
    BalanceBins(Money),
}

impl FromStr for GroupBy {
    type Err = String;

    /// Accepts `account`, `bank`, `bank-account`, `date`, `date-daily`,
    /// `date-weekly`, `date-monthly`, `date-yearly`, `name`, `tags`,
    /// `amount:WIDTH` and `balance:WIDTH`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        if let Some((field, width)) = lower.split_once(':') {
            let width: Money = width
                .parse()
                .map_err(|_| format!("Invalid bin width: '{width}'"))?;
            if !width.is_positive() {
                return Err(format!("Bin width must be positive: '{width}'"));
            }
            return match field {
                "amount" => Ok(GroupBy::AmountBins(width)),
                "balance" => Ok(GroupBy::BalanceBins(width)),
                other => Err(format!("Cannot bin by '{other}'")),
            };
        }
        match lower.as_str() {
            "account" => Ok(GroupBy::Account),
            "bank" => Ok(GroupBy::Bank),
            "bank-account" => Ok(GroupBy::BankAccount),
            "date" => Ok(GroupBy::Date),
            "name" => Ok(GroupBy::Name),
            "tags" => Ok(GroupBy::Tags),
            other => match other.strip_prefix("date-") {
                Some(period) => period.parse().map(GroupBy::Period),
                None => Err(format!("Unknown grouping: '{other}'")),
            },
        }
    }
}

/// Bucket identifier. Keys of one grouping share a variant, so the derived
/// ordering sorts text alphabetically and periods by start date.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum GroupKey {
    Text(String),
    BankAccount { bank: String, account: String },
    Date(NaiveDate),
    Period(DateRange),
    Tags(Vec<String>),
    Bin { lower: Money, upper: Money },
    /// Records without a name (or without tags) when grouping by name or tags.
    Uncategorized,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Text(text) => write!(f, "{text}"),
            GroupKey::BankAccount { bank, account } => write!(f, "{bank}/{account}"),
            GroupKey::Date(date) => write!(f, "{date}"),
            GroupKey::Period(range) => write!(f, "{range}"),
            GroupKey::Tags(tags) => write!(f, "{}", tags.join(", ")),
            GroupKey::Bin { lower, upper } => write!(f, "[{lower}, {upper})"),
            GroupKey::Uncategorized => write!(f, "(uncategorized)"),
        }
    }
}

impl GroupBy {
    fn key_for(self, record: &Record) -> GroupKey {
        match self {
            GroupBy::Account => GroupKey::Text(record.account().to_string()),
            GroupBy::Bank => GroupKey::Text(record.bank().to_string()),
            GroupBy::BankAccount => GroupKey::BankAccount {
                bank: record.bank().to_string(),
                account: record.account().to_string(),
            },
            GroupBy::Date => GroupKey::Date(record.date()),
            GroupBy::Period(period) => GroupKey::Period(period.bucket(record.date())),
            GroupBy::Name => match record.name() {
                Some(name) => GroupKey::Text(name.to_string()),
                None => GroupKey::Uncategorized,
            },
            GroupBy::Tags => {
                if record.tags().is_empty() {
                    GroupKey::Uncategorized
                } else {
                    // BTreeSet iteration is already sorted.
                    GroupKey::Tags(record.tags().iter().cloned().collect())
                }
            }
            GroupBy::AmountBins(width) => bin(record.amount(), width),
            GroupBy::BalanceBins(width) => bin(record.balance(), width),
        }
    }
}

fn bin(value: Money, width: Money) -> GroupKey {
    let width = width.abs();
    if width.is_zero() {
        return GroupKey::Bin {
            lower: value,
            upper: value,
        };
    }
    let steps = (value.as_decimal() / width.as_decimal()).floor();
    let lower = Money::from_decimal(steps * width.as_decimal());
    GroupKey::Bin {
        lower,
        upper: lower + width,
    }
}

impl<'a> RecordView<'a> {
    /// Partitions the view. Each record lands in exactly one bucket, buckets
    /// keep the view's relative order, and empty buckets never appear.
    pub fn group(&self, by: GroupBy) -> BTreeMap<GroupKey, RecordView<'a>> {
        let mut buckets: BTreeMap<GroupKey, Vec<usize>> = BTreeMap::new();
        for (idx, record) in self.indexed() {
            buckets.entry(by.key_for(record)).or_default().push(idx);
        }
        buckets
            .into_iter()
            .map(|(key, indices)| (key, self.with_indices(indices)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::tests::{date, record, sample};
    use crate::collection::RecordCollection;

    fn total_members(groups: &BTreeMap<GroupKey, RecordView<'_>>) -> usize {
        groups.values().map(RecordView::len).sum()
    }

    #[test]
    fn group_by_bank_partitions_completely() {
        let c = sample();
        let groups = c.group(GroupBy::Bank);
        let keys: Vec<String> = groups.keys().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["ally", "chase"]);
        assert_eq!(total_members(&groups), c.len());

        let mut all: Vec<usize> = groups.values().flat_map(|v| v.indices().to_vec()).collect();
        all.sort();
        assert_eq!(all, vec![0, 1, 2, 3]);
    }

    #[test]
    fn group_by_bank_account_pairs() {
        let c = sample();
        let groups = c.group(GroupBy::BankAccount);
        assert_eq!(groups.len(), 3);
        let chase_checking = &groups[&GroupKey::BankAccount {
            bank: "chase".to_string(),
            account: "checking".to_string(),
        }];
        assert_eq!(chase_checking.indices(), &[0, 3]);
    }

    #[test]
    fn weekly_buckets_start_monday() {
        // 2024-01-15 Monday, 2024-01-17 Wednesday, 2024-01-22 next Monday.
        let c = RecordCollection::new(vec![
            record("b", "a", date(2024, 1, 15), "MON", -100, &[]),
            record("b", "a", date(2024, 1, 17), "WED", -100, &[]),
            record("b", "a", date(2024, 1, 22), "NEXT MON", -100, &[]),
        ]);
        let groups = c.group(GroupBy::Period(Period::Weekly));
        assert_eq!(groups.len(), 2);
        let mut iter = groups.iter();
        let (first_key, first) = iter.next().unwrap();
        assert_eq!(
            first_key,
            &GroupKey::Period(DateRange::new(date(2024, 1, 15), date(2024, 1, 21)))
        );
        assert_eq!(first.indices(), &[0, 1]);
        let (_, second) = iter.next().unwrap();
        assert_eq!(second.indices(), &[2]);
    }

    #[test]
    fn monthly_keys_sorted_by_start_and_empty_months_omitted() {
        let c = RecordCollection::new(vec![
            record("b", "a", date(2021, 5, 3), "MAY", -100, &[]),
            record("b", "a", date(2021, 1, 9), "JAN", -100, &[]),
            record("b", "a", date(2021, 1, 30), "JAN 2", -100, &[]),
        ]);
        let groups = c.group(GroupBy::Period(Period::Monthly));
        let starts: Vec<NaiveDate> = groups
            .keys()
            .map(|k| match k {
                GroupKey::Period(r) => r.start,
                other => panic!("unexpected key {other:?}"),
            })
            .collect();
        assert_eq!(starts, vec![date(2021, 1, 1), date(2021, 5, 1)]);
        assert_eq!(total_members(&groups), 3);
    }

    #[test]
    fn yearly_and_exact_date() {
        let c = sample();
        assert_eq!(c.group(GroupBy::Period(Period::Yearly)).len(), 1);
        assert_eq!(c.group(GroupBy::Date).len(), 4);
    }

    #[test]
    fn name_and_tags_put_uncategorized_in_own_bucket() {
        let c = sample();
        let by_tags = c.group(GroupBy::Tags);
        assert_eq!(by_tags[&GroupKey::Uncategorized].indices(), &[1]);
        assert_eq!(
            by_tags[&GroupKey::Tags(vec!["food".to_string(), "subs".to_string()])].indices(),
            &[2]
        );
        assert_eq!(total_members(&by_tags), c.len());

        let by_name = c.group(GroupBy::Name);
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[&GroupKey::Uncategorized].len(), 4);
    }

    #[test]
    fn amount_bins_floor_to_width() {
        let c = sample();
        let groups = c.group(GroupBy::AmountBins(Money::from_cents(1000)));
        let pizza = GroupKey::Bin {
            lower: Money::from_cents(-3000),
            upper: Money::from_cents(-2000),
        };
        assert_eq!(groups[&pizza].indices(), &[0]);
        let sub = GroupKey::Bin {
            lower: Money::from_cents(-2000),
            upper: Money::from_cents(-1000),
        };
        assert_eq!(groups[&sub].indices(), &[2]);
        assert_eq!(total_members(&groups), c.len());
    }

    #[test]
    fn group_by_from_str() {
        assert_eq!("date-weekly".parse::<GroupBy>(), Ok(GroupBy::Period(Period::Weekly)));
        assert_eq!("bank-account".parse::<GroupBy>(), Ok(GroupBy::BankAccount));
        assert_eq!(
            "amount:25".parse::<GroupBy>(),
            Ok(GroupBy::AmountBins(Money::from_cents(2500)))
        );
        assert!("amount:0".parse::<GroupBy>().is_err());
        assert!("date-hourly".parse::<GroupBy>().is_err());
        assert!("colour".parse::<GroupBy>().is_err());
    }

    #[test]
    fn group_of_filtered_view_only_sees_view() {
        let c = sample();
        let chase = c.filter(&crate::filter::FilterSpec {
            bank: Some("chase".to_string()),
            ..Default::default()
        });
        let groups = chase.group(GroupBy::Account);
        assert_eq!(total_members(&groups), 3);
        assert_eq!(groups[&GroupKey::Text("checking".to_string())].indices(), &[0, 3]);
    }
}
