//! # Error Types
//!
//! Errors fall in two tiers. Setup errors (missing data root, registry or
//! meteorological directory, unreadable time coordinate, incompatible grids)
//! abort the run before anything is written. Everything raised while a single
//! year is sampled, aggregated or compressed is recovered by the yearly driver,
//! which logs the year and moves on.

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("JSON configuration error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML configuration error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data root '{name}' not found (searched: {searched:?})")]
    DataRootNotFound { name: String, searched: Vec<PathBuf> },

    #[error("City registry not found: {0}")]
    RegistryNotFound(PathBuf),

    #[error("City registry is invalid: {0}")]
    Registry(String),

    #[error("Meteorological directory not found: {0}")]
    MeteoDirNotFound(PathBuf),

    #[error("No NetCDF files found in {0}")]
    NoNetCdfFiles(PathBuf),

    #[error("Variable not found, tried {candidates:?} in {file}")]
    VariableNotFound { file: String, candidates: Vec<String> },

    #[error("Coordinate '{coordinate}' not found in {file}")]
    CoordinateNotFound { file: String, coordinate: String },

    #[error("Unexpected dimensions for '{variable}': {dimensions:?} (expected time, lat, lon)")]
    DimensionLayout {
        variable: String,
        dimensions: Vec<String>,
    },

    #[error("Grid mismatch between files: {0}")]
    GridMismatch(String),

    #[error("Cannot decode time coordinate: {0}")]
    TimeDecode(String),

    #[error("Axis '{axis}' is not strictly monotonic")]
    NonMonotonicAxis { axis: String },

    #[error("Malformed block: {0}")]
    MalformedBlock(String),

    #[error("Column/label mismatch: {columns} columns for {labels} labels")]
    LabelMismatch { columns: usize, labels: usize },
}

impl CacheError {
    /// Whether this error belongs to the setup tier and must abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CacheError::Config(_)
                | CacheError::Json(_)
                | CacheError::Yaml(_)
                | CacheError::DataRootNotFound { .. }
                | CacheError::RegistryNotFound(_)
                | CacheError::Registry(_)
                | CacheError::MeteoDirNotFound(_)
                | CacheError::NoNetCdfFiles(_)
                | CacheError::VariableNotFound { .. }
                | CacheError::CoordinateNotFound { .. }
                | CacheError::DimensionLayout { .. }
                | CacheError::GridMismatch(_)
                | CacheError::TimeDecode(_)
                | CacheError::NonMonotonicAxis { .. }
        )
    }
}
