//! # precipcache
//!
//! Builds a compact, query-friendly precipitation cache from a multi-decade
//! gridded NetCDF archive: one row per month, one column per city.
//!
//! ## Pipeline
//!
//! 1. Load the city registry and drop duplicate labels
//! 2. Open the NetCDF files as one lazily-read gridded field
//! 3. For every year: sample the nearest grid cell of each city, sum to
//!    months, convert metres to millimetres, clamp negatives and narrow to
//!    `f32`
//! 4. Concatenate the years and write a zstd Parquet file
//!
//! A year that fails is logged and left out; setup problems abort before any
//! output is written.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use precipcache::{generate_cache, config::CacheConfig};
//!
//! let config = CacheConfig::default();
//! let report = generate_cache(&config, false)?;
//! println!("{} years written", report.years_written.len());
//! # Ok::<(), precipcache::error::CacheError>(())
//! ```

pub mod aggregate;
pub mod calendar;
pub mod cli;
pub mod compress;
pub mod config;
pub mod driver;
pub mod error;
pub mod field;
pub mod log;
pub mod registry;
pub mod sampler;
pub mod writer;


use crate::config::{CacheConfig, DataLayout, VariableProfile};
use crate::driver::YearlyDriver;
use crate::error::Result;
use crate::field::{GriddedField, NetcdfField};
use crate::log::{YearProgress, show_field_info, show_registry_summary};
use crate::registry::CityRegistry;
use crate::sampler::SamplePlan;
use crate::writer::{CacheTable, SizeReport, report_size};
use std::path::{Path, PathBuf};

/// Summary of one cache generation run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheReport {
    /// Distinct years found in the archive
    pub years_total: usize,
    /// Years present in the cache, ascending
    pub years_written: Vec<i32>,
    /// Years skipped after a failure
    pub years_failed: Vec<i32>,
    pub cities: usize,
    pub rows: usize,
    /// Written file, `None` when nothing was written
    pub output: Option<PathBuf>,
    pub size: Option<SizeReport>,
}

/// Runs the whole pipeline with the data root resolved from `config`.
///
/// # Errors
///
/// Only setup failures are returned (missing data root, registry or NetCDF
/// directory, unreadable coordinates) and the write itself. Per-year failures
/// are reported in [`CacheReport::years_failed`].
pub fn generate_cache(config: &CacheConfig, interactive: bool) -> Result<CacheReport> {
    config.validate()?;
    let layout = config.layout()?;
    generate_cache_with_layout(config, &layout, interactive)
}

pub fn generate_cache_with_layout(
    config: &CacheConfig,
    layout: &DataLayout,
    interactive: bool,
) -> Result<CacheReport> {
    let registry = CityRegistry::load(&layout.cities_file)?;
    ::log::info!("{} cities loaded from {}", registry.len(), layout.cities_file.display());
    if interactive {
        show_registry_summary(&registry);
    }

    let field = NetcdfField::open_dir(&layout.meteo_dir, &config.variable_candidates)?;
    ::log::info!(
        "Variable '{}' from {} NetCDF file(s)",
        field.variable_name(),
        field.file_count()
    );

    let result = build_cache(
        &field,
        &registry,
        &config.profile,
        &layout.output_file,
        config.size_budget_mb,
        interactive,
    );
    let closed = field.close();
    let report = result?;
    closed?;
    Ok(report)
}

/// Runs the yearly loop over an opened field and writes the cache.
///
/// # Arguments
///
/// * `field` - The gridded archive to sample
/// * `registry` - Cities to sample; their labels become the cache columns
/// * `profile` - Unit scale, monthly aggregation and clamping policy
/// * `output_path` - Destination of the Parquet cache
/// * `budget_mb` - Size target the written file is compared against
/// * `interactive` - Show the field summary and the per-year progress bar
///
/// # Returns
///
/// Returns a [`CacheReport`]. An archive without time steps, or a run where
/// every year failed, writes nothing and returns a report with `output: None`.
///
/// # Errors
///
/// This function will return an error if:
/// - The grid axes are not strictly monotonic
/// - The merged table cannot be built or written
///
/// Failures inside a single year are not errors; they are listed in
/// [`CacheReport::years_failed`].
pub fn build_cache(
    field: &dyn GriddedField,
    registry: &CityRegistry,
    profile: &VariableProfile,
    output_path: &Path,
    budget_mb: f64,
    interactive: bool,
) -> Result<CacheReport> {
    let labels = registry.labels();
    let plan = SamplePlan::new(field.latitudes(), field.longitudes(), &registry.points())?;
    let driver = YearlyDriver::new(field, &plan, &labels, profile)?;

    let years = driver.years();
    let mut report = CacheReport {
        years_total: years.len(),
        cities: labels.len(),
        ..CacheReport::default()
    };
    if interactive {
        show_field_info(field, &years);
    }
    if years.is_empty() {
        ::log::warn!("The gridded field has no time steps, nothing to write");
        return Ok(report);
    }

    let progress = if interactive {
        YearProgress::new(years.len())
    } else {
        YearProgress::hidden()
    };
    let outcome = driver.run(&progress);
    report.years_failed = outcome.failed_years();
    let frames = outcome.into_frames();
    report.years_written = frames.iter().map(|f| f.year).collect();

    if frames.is_empty() {
        ::log::warn!("No year could be processed, no cache written");
        return Ok(report);
    }
    if !report.years_failed.is_empty() {
        ::log::warn!("Years left out of the cache: {:?}", report.years_failed);
    }

    ::log::info!("Merging {} years", frames.len());
    let table = CacheTable::from_frames(&labels, &frames, profile.clamp_negative)?;
    drop(frames);
    report.rows = table.height();

    let bytes = table.write(output_path)?;
    report.size = Some(report_size(bytes, budget_mb));
    report.output = Some(output_path.to_path_buf());
    Ok(report)
}
