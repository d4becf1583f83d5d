//! # City Registry
//!
//! Loads the list of target cities (label, latitude, longitude and an
//! optional region) from a Parquet or CSV table.
//!
//! Labels become column names of the cache, so they must be unique. Duplicate
//! rows are removed here, keeping the first occurrence, before any sampling
//! happens.

use crate::error::{CacheError, Result};
use log::{debug, warn};
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

pub const LABEL_COLUMN: &str = "label";
pub const LAT_COLUMN: &str = "lat";
pub const LON_COLUMN: &str = "lon";
pub const REGION_COLUMN: &str = "Region_Assignee";

/// Name of the timestamp column of the cache; no city may use it.
pub const INDEX_COLUMN: &str = "time";

#[derive(Debug, Clone, PartialEq)]
pub struct City {
    pub label: String,
    pub lat: f64,
    pub lon: f64,
    pub region: Option<String>,
}

impl City {
    pub fn new(label: &str, lat: f64, lon: f64) -> Self {
        City {
            label: label.to_string(),
            lat,
            lon,
            region: None,
        }
    }
}

/// Cities with unique labels, in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct CityRegistry {
    cities: Vec<City>,
}

impl CityRegistry {
    /// Builds a registry, dropping duplicate labels (first row wins) and
    /// rows with non-finite coordinates.
    ///
    /// # Errors
    ///
    /// Fails when a city is named like the cache index column or when no
    /// usable city remains.
    pub fn from_cities(cities: Vec<City>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(cities.len());
        let mut duplicates = 0;

        for city in cities {
            if !city.lat.is_finite() || !city.lon.is_finite() {
                warn!("Skipping city '{}' with invalid coordinates", city.label);
                continue;
            }
            if city.label == INDEX_COLUMN {
                return Err(CacheError::Registry(format!(
                    "city label '{INDEX_COLUMN}' collides with the cache index column"
                )));
            }
            if seen.insert(city.label.clone()) {
                kept.push(city);
            } else {
                duplicates += 1;
            }
        }

        if duplicates > 0 {
            debug!("Removed {duplicates} duplicated city labels");
        }
        if kept.is_empty() {
            return Err(CacheError::Registry("no usable city in registry".to_string()));
        }
        Ok(CityRegistry { cities: kept })
    }

    /// Reads a registry from a Parquet file, or CSV when the extension is `.csv`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(CacheError::RegistryNotFound(path.to_path_buf()));
        }
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));

        let df = if is_csv {
            CsvReadOptions::default()
                .with_has_header(true)
                .try_into_reader_with_file_path(Some(path.to_path_buf()))?
                .finish()?
        } else {
            ParquetReader::new(File::open(path)?).finish()?
        };
        debug!("City registry shape: {:?}", df.shape());
        Self::from_dataframe(&df)
    }

    /// Extracts cities from a table with `label`, `lat`, `lon` and optionally
    /// `Region_Assignee` columns. Rows with a missing label or coordinate are
    /// skipped.
    pub fn from_dataframe(df: &DataFrame) -> Result<Self> {
        let column_names: Vec<&str> = df.get_column_names().iter().map(|s| s.as_str()).collect();
        for required in [LABEL_COLUMN, LAT_COLUMN, LON_COLUMN] {
            if !column_names.contains(&required) {
                return Err(CacheError::Registry(format!("missing required column '{required}'")));
            }
        }
        let has_region = column_names.contains(&REGION_COLUMN);

        let mut exprs = vec![
            col(LABEL_COLUMN).cast(DataType::String),
            col(LAT_COLUMN).cast(DataType::Float64),
            col(LON_COLUMN).cast(DataType::Float64),
        ];
        if has_region {
            exprs.push(col(REGION_COLUMN).cast(DataType::String));
        }
        let selected = df.clone().lazy().select(exprs).collect()?;

        let labels = selected.column(LABEL_COLUMN)?.as_materialized_series().str()?;
        let lats = selected.column(LAT_COLUMN)?.as_materialized_series().f64()?;
        let lons = selected.column(LON_COLUMN)?.as_materialized_series().f64()?;
        let regions: Option<Vec<Option<String>>> = if has_region {
            let series = selected.column(REGION_COLUMN)?.as_materialized_series();
            Some(
                series
                    .str()?
                    .into_iter()
                    .map(|r| r.map(|s| s.trim().to_string()))
                    .collect(),
            )
        } else {
            None
        };

        let mut cities = Vec::with_capacity(selected.height());
        let mut incomplete = 0;
        for (row, ((label, lat), lon)) in labels
            .into_iter()
            .zip(lats.into_iter())
            .zip(lons.into_iter())
            .enumerate()
        {
            match (label, lat, lon) {
                (Some(label), Some(lat), Some(lon)) => cities.push(City {
                    label: label.to_string(),
                    lat,
                    lon,
                    region: regions.as_ref().and_then(|r| r[row].clone()),
                }),
                _ => incomplete += 1,
            }
        }
        if incomplete > 0 {
            warn!("Skipped {incomplete} registry rows with missing label or coordinates");
        }

        Self::from_cities(cities)
    }

    pub fn cities(&self) -> &[City] {
        &self.cities
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }

    /// Labels in registry order.
    pub fn labels(&self) -> Vec<String> {
        self.cities.iter().map(|c| c.label.clone()).collect()
    }

    /// `(lat, lon)` points in registry order, aligned with [`Self::labels`].
    pub fn points(&self) -> Vec<(f64, f64)> {
        self.cities.iter().map(|c| (c.lat, c.lon)).collect()
    }
}
