//! # CLI Module
//!
//! Command-line interface for precipcache. Running the binary without any
//! argument detects the `Donnees` directory and rebuilds the cache with the
//! default layout; the options below only override that behaviour.
//! Every option can also be set through a `PRECIPCACHE_` environment variable.

use crate::config::CacheConfig;
use crate::error::Result;
use clap::Parser;
use std::path::PathBuf;

/// Builds the monthly per-city precipitation cache from a NetCDF archive
#[derive(Parser, Debug)]
#[command(name = "precipcache")]
#[command(about = "Build the monthly per-city precipitation cache from gridded NetCDF data")]
#[command(version)]
#[command(long_about = "
precipcache converts a multi-decade gridded precipitation archive (NetCDF) into a compact
Parquet table: one row per month, one column per city, values in millimetres.

The data root is found automatically: a 'Donnees' directory next to the executable (or in
its parent), then next to the working directory. Inputs and output are resolved inside it:

  Donnees/DonneesVilles/villes_avec_regions.parquet       city registry
  Donnees/DonneesTempPrecipitation/*.nc                   gridded archive
  Donnees/Cache_System/historique_pluie_v2_light.parquet  generated cache

EXAMPLES:
  # Default run
  precipcache

  # Explicit data root and configuration file
  precipcache --data-root /mnt/climat/Donnees --config cache.yaml
")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode - suppress all output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file path (JSON or YAML)
    #[arg(short, long, env = "PRECIPCACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data root directory, skips auto-detection
    #[arg(long, env = "PRECIPCACHE_DATA_ROOT")]
    pub data_root: Option<PathBuf>,

    /// Output file name inside the cache directory
    #[arg(short, long, env = "PRECIPCACHE_OUTPUT")]
    pub output: Option<PathBuf>,
}

impl Cli {
    /// Effective configuration: file (or defaults), then command-line overrides.
    pub fn resolve_config(&self) -> Result<CacheConfig> {
        let mut config = match &self.config {
            Some(path) => CacheConfig::from_file(path)?,
            None => CacheConfig::default(),
        };
        if let Some(root) = &self.data_root {
            config.data_root = Some(root.clone());
        }
        if let Some(output) = &self.output {
            config.output_file = output.clone();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn log_level(&self) -> ::log::LevelFilter {
        if self.quiet {
            ::log::LevelFilter::Error
        } else if self.verbose {
            ::log::LevelFilter::Debug
        } else {
            ::log::LevelFilter::Info
        }
    }
}
