use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use super::collection::RecordView;
use super::money::Money;
use super::period::Period;
use super::record::Record;

/// Raised by aggregations over zero records rather than reporting zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Cannot aggregate an empty collection")]
pub struct EmptyCollectionError;

#[derive(Debug, Clone, Copy)]
enum Field {
    Amount,
    Balance,
}

/// Summary of one numeric field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueStats {
    pub total: Money,
    pub mean: Money,
    pub median: Money,
    pub min: Money,
    pub max: Money,
    pub stdev: f64,
}

/// Records per calendar period, counting periods with no records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrequencyStats {
    pub mean: f64,
    pub median: f64,
    pub stdev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub count: usize,
    pub amount: ValueStats,
    pub abs_amount: ValueStats,
    pub balance: ValueStats,
    pub abs_balance: ValueStats,
    pub frequency: BTreeMap<Period, FrequencyStats>,
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn mean_of(values: &[Money]) -> Money {
    let total: Money = values.iter().copied().sum();
    Money::from_decimal(total.as_decimal() / Decimal::from(values.len()))
}

fn median_of(sorted: &[Money]) -> Money {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        Money::from_decimal((sorted[mid - 1].as_decimal() + sorted[mid].as_decimal()) / Decimal::TWO)
    }
}

/// Sample standard deviation; zero for a single value.
fn stdev_of(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}

fn median_f64(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}

impl<'a> RecordView<'a> {
    fn values(&self, field: Field, absolute_value: bool) -> Result<Vec<Money>, EmptyCollectionError> {
        if self.is_empty() {
            return Err(EmptyCollectionError);
        }
        Ok(self
            .iter()
            .map(|r: &Record| {
                let v = match field {
                    Field::Amount => r.amount(),
                    Field::Balance => r.balance(),
                };
                if absolute_value {
                    v.abs()
                } else {
                    v
                }
            })
            .collect())
    }

    pub fn sum_amount(&self, absolute_value: bool) -> Result<Money, EmptyCollectionError> {
        Ok(self.values(Field::Amount, absolute_value)?.into_iter().sum())
    }

    /// Rounded to cents.
    pub fn mean_amount(&self, absolute_value: bool) -> Result<Money, EmptyCollectionError> {
        Ok(mean_of(&self.values(Field::Amount, absolute_value)?))
    }

    pub fn median_amount(&self, absolute_value: bool) -> Result<Money, EmptyCollectionError> {
        let mut values = self.values(Field::Amount, absolute_value)?;
        values.sort();
        Ok(median_of(&values))
    }

    pub fn max_amount(&self, absolute_value: bool) -> Result<Money, EmptyCollectionError> {
        self.values(Field::Amount, absolute_value)?
            .into_iter()
            .max()
            .ok_or(EmptyCollectionError)
    }

    pub fn min_amount(&self, absolute_value: bool) -> Result<Money, EmptyCollectionError> {
        self.values(Field::Amount, absolute_value)?
            .into_iter()
            .min()
            .ok_or(EmptyCollectionError)
    }

    pub fn stdev_amount(&self, absolute_value: bool) -> Result<f64, EmptyCollectionError> {
        self.value_stats(Field::Amount, absolute_value).map(|s| s.stdev)
    }

    pub fn sum_balance(&self, absolute_value: bool) -> Result<Money, EmptyCollectionError> {
        Ok(self.values(Field::Balance, absolute_value)?.into_iter().sum())
    }

    pub fn mean_balance(&self, absolute_value: bool) -> Result<Money, EmptyCollectionError> {
        Ok(mean_of(&self.values(Field::Balance, absolute_value)?))
    }

    pub fn max_balance(&self, absolute_value: bool) -> Result<Money, EmptyCollectionError> {
        self.values(Field::Balance, absolute_value)?
            .into_iter()
            .max()
            .ok_or(EmptyCollectionError)
    }

    pub fn min_balance(&self, absolute_value: bool) -> Result<Money, EmptyCollectionError> {
        self.values(Field::Balance, absolute_value)?
            .into_iter()
            .min()
            .ok_or(EmptyCollectionError)
    }

    fn value_stats(&self, field: Field, absolute_value: bool) -> Result<ValueStats, EmptyCollectionError> {
        let mut values = self.values(field, absolute_value)?;
        values.sort();
        let floats: Vec<f64> = values.iter().map(|v| v.to_f64()).collect();
        Ok(ValueStats {
            total: values.iter().copied().sum(),
            mean: mean_of(&values),
            median: median_of(&values),
            min: values[0],
            max: values[values.len() - 1],
            stdev: round_to(stdev_of(&floats), 2),
        })
    }

    /// Record counts for every `period` bucket between the earliest and the
    /// latest record.
    fn period_counts(&self, period: Period) -> Result<Vec<f64>, EmptyCollectionError> {
        let (first, last) = match (self.earliest_date(), self.latest_date()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(EmptyCollectionError),
        };
        let mut counts: BTreeMap<_, usize> = period
            .buckets(first, last)
            .into_iter()
            .map(|range| (range, 0))
            .collect();
        for record in self.iter() {
            *counts.entry(period.bucket(record.date())).or_insert(0) += 1;
        }
        Ok(counts.into_values().map(|c| c as f64).collect())
    }

    pub fn mean_frequency(&self, period: Period) -> Result<f64, EmptyCollectionError> {
        let counts = self.period_counts(period)?;
        Ok(round_to(counts.iter().sum::<f64>() / counts.len() as f64, 4))
    }

    pub fn median_frequency(&self, period: Period) -> Result<f64, EmptyCollectionError> {
        let mut counts = self.period_counts(period)?;
        Ok(round_to(median_f64(&mut counts), 4))
    }

    pub fn stdev_frequency(&self, period: Period) -> Result<f64, EmptyCollectionError> {
        Ok(round_to(stdev_of(&self.period_counts(period)?), 4))
    }

    pub fn statistics(&self) -> Result<Statistics, EmptyCollectionError> {
        let mut frequency = BTreeMap::new();
        for period in [Period::Daily, Period::Weekly, Period::Monthly, Period::Yearly] {
            frequency.insert(
                period,
                FrequencyStats {
                    mean: self.mean_frequency(period)?,
                    median: self.median_frequency(period)?,
                    stdev: self.stdev_frequency(period)?,
                },
            );
        }
        Ok(Statistics {
            count: self.len(),
            amount: self.value_stats(Field::Amount, false)?,
            abs_amount: self.value_stats(Field::Amount, true)?,
            balance: self.value_stats(Field::Balance, false)?,
            abs_balance: self.value_stats(Field::Balance, true)?,
            frequency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::tests::{date, record, sample};
    use crate::collection::RecordCollection;

    fn pair() -> RecordCollection {
        RecordCollection::new(vec![
            record("b", "a", date(2021, 1, 4), "OUT", -5000, &[]),
            record("b", "a", date(2021, 1, 6), "IN", 3000, &[]),
        ])
    }

    #[test]
    fn empty_collection_fails_instead_of_zero() {
        let c = RecordCollection::default();
        assert_eq!(c.sum_amount(false), Err(EmptyCollectionError));
        assert_eq!(c.mean_amount(false), Err(EmptyCollectionError));
        assert_eq!(c.max_amount(true), Err(EmptyCollectionError));
        assert_eq!(c.min_amount(false), Err(EmptyCollectionError));
        assert!(c.view().statistics().is_err());
        assert!(c.view().mean_frequency(Period::Weekly).is_err());
    }

    #[test]
    fn max_respects_absolute_value_flag() {
        let c = pair();
        assert_eq!(c.max_amount(true).unwrap(), Money::from_cents(5000));
        assert_eq!(c.max_amount(false).unwrap(), Money::from_cents(3000));
        assert_eq!(c.min_amount(false).unwrap(), Money::from_cents(-5000));
        assert_eq!(c.min_amount(true).unwrap(), Money::from_cents(3000));
    }

    #[test]
    fn sum_and_mean() {
        let c = pair();
        assert_eq!(c.sum_amount(false).unwrap(), Money::from_cents(-2000));
        assert_eq!(c.sum_amount(true).unwrap(), Money::from_cents(8000));
        assert_eq!(c.mean_amount(false).unwrap(), Money::from_cents(-1000));
        assert_eq!(c.mean_amount(true).unwrap(), Money::from_cents(4000));
    }

    #[test]
    fn aggregates_at_the_amount_limit() {
        let max = Money::from_cents(Money::MAX_UNITS * 100);
        let at_limit = |desc: &str| {
            Record::new("a", "b", date(2021, 1, 1), desc, max, Money::zero()).unwrap()
        };
        let c = RecordCollection::new(vec![at_limit("A"), at_limit("B")]);
        assert_eq!(c.sum_amount(false).unwrap(), max + max);
        assert_eq!(c.mean_amount(true).unwrap(), max);
        assert_eq!(c.view().statistics().unwrap().amount.total, max + max);
    }

    #[test]
    fn mean_rounds_to_cents() {
        let c = RecordCollection::new(vec![
            record("b", "a", date(2021, 1, 1), "A", 100, &[]),
            record("b", "a", date(2021, 1, 1), "B", 100, &[]),
            record("b", "a", date(2021, 1, 1), "C", 200, &[]),
        ]);
        assert_eq!(c.mean_amount(false).unwrap(), Money::from_cents(133));
    }

    #[test]
    fn median_odd_and_even() {
        let c = sample();
        // -25.00, -11.00, 3.12, 2500.00
        assert_eq!(c.view().median_amount(false).unwrap(), Money::from_cents(-394));
        let odd = RecordCollection::new(vec![
            record("b", "a", date(2021, 1, 1), "A", 500, &[]),
            record("b", "a", date(2021, 1, 1), "B", -100, &[]),
            record("b", "a", date(2021, 1, 1), "C", 200, &[]),
        ]);
        assert_eq!(odd.view().median_amount(false).unwrap(), Money::from_cents(200));
    }

    #[test]
    fn stdev_of_single_record_is_zero() {
        let c = RecordCollection::new(vec![record("b", "a", date(2021, 1, 1), "A", 500, &[])]);
        assert_eq!(c.view().stdev_amount(false).unwrap(), 0.0);
        assert_eq!(pair().view().stdev_amount(false).unwrap(), 56.57);
    }

    #[test]
    fn balance_aggregates() {
        let c = pair();
        let v = c.view();
        assert_eq!(v.max_balance(false).unwrap(), Money::from_cents(103_000));
        assert_eq!(v.min_balance(false).unwrap(), Money::from_cents(95_000));
        assert_eq!(v.sum_balance(false).unwrap(), Money::from_cents(198_000));
        assert_eq!(v.mean_balance(true).unwrap(), Money::from_cents(99_000));
    }

    #[test]
    fn frequency_counts_empty_periods() {
        let c = RecordCollection::new(vec![
            record("b", "a", date(2021, 1, 5), "A", -100, &[]),
            record("b", "a", date(2021, 1, 6), "B", -100, &[]),
            record("b", "a", date(2021, 3, 1), "C", -100, &[]),
        ]);
        let v = c.view();
        // January: 2, February: 0, March: 1
        assert_eq!(v.mean_frequency(Period::Monthly).unwrap(), 1.0);
        assert_eq!(v.median_frequency(Period::Monthly).unwrap(), 1.0);
        assert_eq!(v.stdev_frequency(Period::Monthly).unwrap(), 1.0);
        assert_eq!(v.mean_frequency(Period::Yearly).unwrap(), 3.0);
    }

    #[test]
    fn statistics_bundle() {
        let c = pair();
        let stats = c.view().statistics().unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.amount.max, Money::from_cents(3000));
        assert_eq!(stats.abs_amount.max, Money::from_cents(5000));
        assert_eq!(stats.amount.total, Money::from_cents(-2000));
        assert_eq!(stats.frequency.len(), 4);
        assert_eq!(stats.frequency[&Period::Weekly].mean, 2.0);
        assert!(serde_json::to_string(&stats).is_ok());
    }
}
