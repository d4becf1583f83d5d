//! # Cache Writer
//!
//! Concatenates the yearly frames into the final table and persists it as a
//! zstd-compressed Parquet file.
//!
//! ## Layout
//!
//! - `time`: month-end timestamp (`Datetime[ms]`, midnight)
//! - one `Float32` column per city, named by its label, in registry order
//!
//! The file is first written to a temporary file next to the destination and
//! then renamed, so a failed run never leaves a truncated cache behind.

use crate::driver::YearFrame;
use crate::error::{CacheError, Result};
use crate::registry::INDEX_COLUMN;
use chrono::NaiveTime;
use log::{debug, info, warn};
use polars::prelude::*;
use std::fs::{self, File};
use std::path::Path;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// On-disk size of the written cache against the storage target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeReport {
    pub bytes: u64,
    pub megabytes: f64,
    pub budget_mb: f64,
    pub within_budget: bool,
}

impl SizeReport {
    pub fn new(bytes: u64, budget_mb: f64) -> Self {
        let megabytes = bytes as f64 / BYTES_PER_MB;
        SizeReport {
            bytes,
            megabytes,
            budget_mb,
            within_budget: megabytes < budget_mb,
        }
    }
}

/// The merged year-month x city table.
#[derive(Debug, Clone)]
pub struct CacheTable {
    df: DataFrame,
}

impl CacheTable {
    /// Concatenates frames in the order given (ascending years).
    ///
    /// Every frame must carry exactly `labels`, in that order. With
    /// `clamp_negative` any remaining negative value is floored to 0.
    pub fn from_frames(labels: &[String], frames: &[YearFrame], clamp_negative: bool) -> Result<Self> {
        let rows: usize = frames.iter().map(|f| f.months.len()).sum();
        let mut times: Vec<i64> = Vec::with_capacity(rows);
        let mut values: Vec<Vec<f32>> = vec![Vec::with_capacity(rows); labels.len()];

        for frame in frames {
            if frame.columns.len() != labels.len() {
                return Err(CacheError::LabelMismatch {
                    columns: frame.columns.len(),
                    labels: labels.len(),
                });
            }
            for (i, (column, label)) in frame.columns.iter().zip(labels).enumerate() {
                if &column.label != label || column.values.len() != frame.months.len() {
                    return Err(CacheError::MalformedBlock(format!(
                        "year {}: column {} is '{}' with {} rows, expected '{}' with {}",
                        frame.year,
                        i,
                        column.label,
                        column.values.len(),
                        label,
                        frame.months.len()
                    )));
                }
                values[i].extend_from_slice(&column.values);
            }
            times.extend(
                frame
                    .months
                    .iter()
                    .map(|d| d.and_time(NaiveTime::MIN).and_utc().timestamp_millis()),
            );
        }

        if clamp_negative {
            let mut clamped = 0usize;
            for v in values.iter_mut().flatten() {
                if *v < 0.0 || v.is_nan() {
                    *v = 0.0;
                    clamped += 1;
                }
            }
            if clamped > 0 {
                debug!("Clamped {clamped} residual negative values");
            }
        }

        let mut columns: Vec<Column> = Vec::with_capacity(labels.len() + 1);
        let time = Series::new(INDEX_COLUMN.into(), times)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;
        columns.push(time.into());
        for (label, series) in labels.iter().zip(values) {
            columns.push(Series::new(label.as_str().into(), series).into());
        }

        Ok(CacheTable {
            df: DataFrame::new(columns)?,
        })
    }

    pub fn dataframe(&self) -> &DataFrame {
        &self.df
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    /// Writes the table to a zstd-compressed Parquet file.
    ///
    /// The data lands in a temporary file inside the destination directory,
    /// which is then renamed over `output_path`.
    ///
    /// # Arguments
    ///
    /// * `output_path` - Destination of the cache; missing parent directories are created
    ///
    /// # Returns
    ///
    /// Returns the size of the written file in bytes.
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - The destination directory cannot be created or is not writable
    /// - The DataFrame cannot be encoded as Parquet
    /// - The temporary file cannot be renamed to `output_path`
    pub fn write(&self, output_path: &Path) -> Result<u64> {
        debug!("Writing cache to parquet file: {}", output_path.display());
        debug!("DataFrame shape: {:?}", self.df.shape());
        debug!("First few rows:\n{}", self.df.head(Some(5)));

        let dir = match output_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        let mut df = self.df.clone();
        ParquetWriter::new(tmp.as_file_mut())
            .with_compression(ParquetCompression::Zstd(None))
            .finish(&mut df)?;
        tmp.persist(output_path).map_err(|e| CacheError::Io(e.error))?;

        let bytes = fs::metadata(output_path)?.len();
        info!("Wrote {} ({} bytes)", output_path.display(), bytes);
        Ok(bytes)
    }
}

/// Checks the written size against the budget and logs the outcome.
pub fn report_size(bytes: u64, budget_mb: f64) -> SizeReport {
    let report = SizeReport::new(bytes, budget_mb);
    if report.within_budget {
        info!("Cache size {:.2} MiB, under the {:.0} MiB target", report.megabytes, budget_mb);
    } else {
        warn!("Cache size {:.2} MiB exceeds the {:.0} MiB target", report.megabytes, budget_mb);
    }
    report
}

/// Loads a persisted cache.
pub fn read_cache(path: &Path) -> Result<DataFrame> {
    Ok(ParquetReader::new(File::open(path)?).finish()?)
}
