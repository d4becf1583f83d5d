//! # Yearly Streaming Driver
//!
//! Walks the archive one calendar year at a time so that peak memory stays
//! bounded by a single year's window, whatever the archive length. For each
//! year the driver reads the bounded window, samples every city at once,
//! aggregates to months, compresses and labels the columns. The year's
//! buffers are dropped before the next year starts.
//!
//! A failing year is logged and skipped; it never aborts the run.

use crate::aggregate::monthly;
use crate::compress::compress_monthly;
use crate::config::VariableProfile;
use crate::error::{CacheError, Result};
use crate::field::GriddedField;
use crate::log::YearProgress;
use crate::sampler::SamplePlan;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use log::{debug, error, info};
use std::ops::Range;
use std::time::{Duration, Instant};

/// One city's monthly values.
#[derive(Debug, Clone, PartialEq)]
pub struct CityColumn {
    pub label: String,
    pub values: Vec<f32>,
}

/// Compressed monthly table for one year.
#[derive(Debug, Clone, PartialEq)]
pub struct YearFrame {
    pub year: i32,
    /// Month-end dates, one per row
    pub months: Vec<NaiveDate>,
    /// One column per city, in registry order
    pub columns: Vec<CityColumn>,
}

/// Result of processing one year.
#[derive(Debug)]
pub struct YearOutcome {
    pub year: i32,
    pub elapsed: Duration,
    pub result: Result<YearFrame>,
}

/// Every year's outcome, in ascending year order.
#[derive(Debug, Default)]
pub struct DriverReport {
    pub outcomes: Vec<YearOutcome>,
}

impl DriverReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed_years(&self) -> Vec<i32> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_err())
            .map(|o| o.year)
            .collect()
    }

    /// Successful frames in year order; failed years are left out.
    pub fn into_frames(self) -> Vec<YearFrame> {
        self.outcomes.into_iter().filter_map(|o| o.result.ok()).collect()
    }
}

/// Attaches labels to columns by position.
///
/// The i-th column always receives the i-th label; the two lists must come
/// from the same ordered source.
pub fn label_columns(labels: &[String], columns: Vec<Vec<f32>>) -> Result<Vec<CityColumn>> {
    if labels.len() != columns.len() {
        return Err(CacheError::LabelMismatch {
            columns: columns.len(),
            labels: labels.len(),
        });
    }
    Ok(labels
        .iter()
        .zip(columns)
        .map(|(label, values)| CityColumn {
            label: label.clone(),
            values,
        })
        .collect())
}

/// Distinct years of a sorted time axis, ascending.
pub fn distinct_years(timestamps: &[NaiveDateTime]) -> Vec<i32> {
    let mut years: Vec<i32> = timestamps.iter().map(|ts| ts.year()).collect();
    years.dedup();
    years
}

/// Contiguous index range of one year in a sorted time axis.
pub fn year_range(timestamps: &[NaiveDateTime], year: i32) -> Range<usize> {
    let start = timestamps.partition_point(|ts| ts.year() < year);
    let end = timestamps.partition_point(|ts| ts.year() <= year);
    start..end
}

pub struct YearlyDriver<'a> {
    field: &'a dyn GriddedField,
    plan: &'a SamplePlan,
    labels: &'a [String],
    profile: &'a VariableProfile,
}

impl<'a> YearlyDriver<'a> {
    /// `labels[i]` names the city of `plan.cells()[i]`.
    pub fn new(
        field: &'a dyn GriddedField,
        plan: &'a SamplePlan,
        labels: &'a [String],
        profile: &'a VariableProfile,
    ) -> Result<Self> {
        if plan.len() != labels.len() {
            return Err(CacheError::LabelMismatch {
                columns: plan.len(),
                labels: labels.len(),
            });
        }
        Ok(YearlyDriver {
            field,
            plan,
            labels,
            profile,
        })
    }

    pub fn years(&self) -> Vec<i32> {
        distinct_years(self.field.timestamps())
    }

    /// Samples, aggregates, compresses and labels one year.
    pub fn process_year(&self, year: i32) -> Result<YearFrame> {
        let timestamps = self.field.timestamps();
        let range = year_range(timestamps, year);
        if range.is_empty() {
            return Err(CacheError::MalformedBlock(format!("no time steps in {year}")));
        }

        let sampled = self.plan.read(self.field, range.clone())?;

        let monthly = monthly(&timestamps[range], &sampled, self.profile.aggregation)?;
        drop(sampled);

        let months = monthly.months().to_vec();
        let columns = compress_monthly(&monthly, self.profile);
        drop(monthly);

        Ok(YearFrame {
            year,
            months,
            columns: label_columns(self.labels, columns)?,
        })
    }

    /// Processes every year of the field in ascending order.
    ///
    /// Each year is handled by [`Self::process_year`]. A failing year is
    /// logged with its error and recorded; the loop then moves on.
    ///
    /// # Arguments
    ///
    /// * `progress` - Progress bar advanced once per year; log lines are printed around it
    ///
    /// # Returns
    ///
    /// Returns a [`DriverReport`] with one [`YearOutcome`] per year, in year
    /// order. This function never fails as a whole.
    pub fn run(&self, progress: &YearProgress) -> DriverReport {
        let mut report = DriverReport::default();
        for year in self.years() {
            progress.start_year(year);
            let started = Instant::now();
            let result = self.process_year(year);
            let elapsed = started.elapsed();

            progress.suspend(|| match &result {
                Ok(frame) => {
                    debug!("{year}: {} months x {} cities", frame.months.len(), frame.columns.len());
                    info!("{year} OK ({:.1}s)", elapsed.as_secs_f64());
                }
                Err(e) => error!("{year} failed: {e}"),
            });
            progress.finish_year();
            report.outcomes.push(YearOutcome {
                year,
                elapsed,
                result,
            });
        }
        progress.finish(report.succeeded(), report.outcomes.len());
        report
    }
}
