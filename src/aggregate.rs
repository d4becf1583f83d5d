//! Monthly resampling of sampled series.
//!
//! Each calendar month present in the input becomes one output row stamped at
//! the month's last day. Months only partially covered (start or end of the
//! archive) are aggregated over the steps that exist.

use crate::calendar::{month_end, year_month};
use crate::error::{CacheError, Result};
use crate::sampler::Sampled;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// How native-resolution steps combine into a monthly value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Accumulated fluxes such as precipitation
    Sum,
    /// Intensities such as temperature
    Mean,
}

impl Aggregation {
    /// Folds one month of values, skipping NaN.
    ///
    /// A sum over nothing but missing values is 0; a mean over nothing is NaN.
    pub fn apply(&self, values: impl IntoIterator<Item = f64>) -> f64 {
        let (sum, count) = values
            .into_iter()
            .filter(|v| !v.is_nan())
            .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        match self {
            Aggregation::Sum => sum,
            Aggregation::Mean if count == 0 => f64::NAN,
            Aggregation::Mean => sum / count as f64,
        }
    }
}

/// Month x point matrix of aggregated values.
#[derive(Debug, Clone, PartialEq)]
pub struct Monthly {
    months: Vec<NaiveDate>,
    points: usize,
    values: Vec<f64>,
}

impl Monthly {
    pub fn months(&self) -> &[NaiveDate] {
        &self.months
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn value(&self, month: usize, point: usize) -> f64 {
        self.values[month * self.points + point]
    }

    pub fn series(&self, point: usize) -> Vec<f64> {
        (0..self.months.len()).map(|m| self.value(m, point)).collect()
    }
}

/// Aggregates a sampled matrix into calendar months.
///
/// `timestamps` must hold one sorted entry per sampled step.
pub fn monthly(timestamps: &[NaiveDateTime], sampled: &Sampled, policy: Aggregation) -> Result<Monthly> {
    if timestamps.len() != sampled.steps() {
        return Err(CacheError::MalformedBlock(format!(
            "{} timestamps for {} sampled steps",
            timestamps.len(),
            sampled.steps()
        )));
    }

    let points = sampled.points();
    let mut months = Vec::new();
    let mut values = Vec::new();
    let mut start = 0;
    while start < timestamps.len() {
        let key = year_month(&timestamps[start]);
        let end = start
            + timestamps[start..]
                .iter()
                .take_while(|ts| year_month(ts) == key)
                .count();

        let stamp = month_end(key.0, key.1)
            .ok_or_else(|| CacheError::MalformedBlock(format!("invalid month {}-{}", key.0, key.1)))?;
        months.push(stamp);
        for point in 0..points {
            values.push(policy.apply((start..end).map(|step| sampled.value(step, point))));
        }
        start = end;
    }

    Ok(Monthly {
        months,
        points,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_skips_missing() {
        assert_eq!(Aggregation::Sum.apply([1.0, f64::NAN, 2.5]), 3.5);
        assert_eq!(Aggregation::Sum.apply([f64::NAN, f64::NAN]), 0.0);
        assert_eq!(Aggregation::Sum.apply(std::iter::empty()), 0.0);
    }

    #[test]
    fn test_mean_skips_missing() {
        assert_eq!(Aggregation::Mean.apply([1.0, f64::NAN, 3.0]), 2.0);
        assert!(Aggregation::Mean.apply([f64::NAN]).is_nan());
    }

    #[test]
    fn test_policy_serde_names() {
        let policy: Aggregation = serde_json::from_str("\"mean\"").unwrap();
        assert_eq!(policy, Aggregation::Mean);
        assert_eq!(serde_json::to_string(&Aggregation::Sum).unwrap(), "\"sum\"");
    }
}
