//! # Configuration Module
//!
//! This module provides configuration parsing and data-root detection for
//! precipcache runs. Every field has a default, so running without any
//! configuration file reproduces the standard layout:
//!
//! ```text
//! Donnees/
//! ├── DonneesVilles/villes_avec_regions.parquet   (city registry)
//! ├── DonneesTempPrecipitation/*.nc               (gridded archive)
//! └── Cache_System/historique_pluie_v2_light.parquet  (generated cache)
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use precipcache::config::CacheConfig;
//!
//! let json = r#"
//! {
//!   "data_root": "/data/Donnees",
//!   "output_file": "pluie.parquet",
//!   "profile": { "scale_factor": 1000.0, "aggregation": "sum" }
//! }"#;
//! let config = CacheConfig::from_json(json)?;
//! assert_eq!(config.variable_candidates, vec!["tp", "total_precipitation"]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::aggregate::Aggregation;
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Metres of water equivalent to millimetres.
pub const METERS_TO_MILLIMETERS: f64 = 1000.0;

/// Main configuration structure for a cache generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Explicit data root; auto-detected when absent
    pub data_root: Option<PathBuf>,
    /// Directory name searched for during auto-detection
    pub data_root_name: String,
    /// City registry path, relative to the data root
    pub cities_file: PathBuf,
    /// Directory holding the NetCDF archive, relative to the data root
    pub meteo_dir: PathBuf,
    /// Cache directory, relative to the data root
    pub cache_dir: PathBuf,
    /// Output file name inside the cache directory
    pub output_file: PathBuf,
    /// Data variable names, first match wins
    pub variable_candidates: Vec<String>,
    /// How raw values are converted and aggregated
    pub profile: VariableProfile,
    /// Informational size target for the generated cache, in MiB
    pub size_budget_mb: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            data_root: None,
            data_root_name: "Donnees".to_string(),
            cities_file: PathBuf::from("DonneesVilles").join("villes_avec_regions.parquet"),
            meteo_dir: PathBuf::from("DonneesTempPrecipitation"),
            cache_dir: PathBuf::from("Cache_System"),
            output_file: PathBuf::from("historique_pluie_v2_light.parquet"),
            variable_candidates: vec!["tp".to_string(), "total_precipitation".to_string()],
            profile: VariableProfile::default(),
            size_budget_mb: 100.0,
        }
    }
}

/// Conversion and aggregation policy for the extracted variable.
///
/// Precipitation is a flux accumulated over the month, so the default profile
/// sums and clamps. Intensity-like variables (temperature) should use
/// [`Aggregation::Mean`] with `clamp_negative` disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableProfile {
    /// Multiplier applied to raw values (source units to stored units)
    pub scale_factor: f64,
    /// Monthly aggregation policy
    pub aggregation: Aggregation,
    /// Floor negative values to zero after conversion
    pub clamp_negative: bool,
}

impl Default for VariableProfile {
    fn default() -> Self {
        VariableProfile::precipitation()
    }
}

impl VariableProfile {
    /// Metres to millimetres, monthly sum, negatives floored.
    pub fn precipitation() -> Self {
        VariableProfile {
            scale_factor: METERS_TO_MILLIMETERS,
            aggregation: Aggregation::Sum,
            clamp_negative: true,
        }
    }
}

impl CacheConfig {
    /// Loads a configuration from a JSON or YAML file.
    ///
    /// The format is chosen from the file extension (`.yaml` / `.yml` for
    /// YAML, anything else is parsed as JSON).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse, or fails
    /// [`CacheConfig::validate`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);

        if is_yaml {
            Self::from_yaml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    /// Loads a configuration from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        let config: CacheConfig = serde_json::from_str(json_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a YAML string.
    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        let config: CacheConfig = serde_yaml::from_str(yaml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.variable_candidates.is_empty() {
            return Err(CacheError::Config(
                "variable_candidates must name at least one variable".to_string(),
            ));
        }
        if !self.profile.scale_factor.is_finite() || self.profile.scale_factor == 0.0 {
            return Err(CacheError::Config(format!(
                "scale_factor must be finite and non-zero, got {}",
                self.profile.scale_factor
            )));
        }
        if !(self.size_budget_mb > 0.0) {
            return Err(CacheError::Config(format!(
                "size_budget_mb must be positive, got {}",
                self.size_budget_mb
            )));
        }
        if self.output_file.as_os_str().is_empty() {
            return Err(CacheError::Config("output_file must not be empty".to_string()));
        }
        Ok(())
    }

    /// Resolves every path of the run against the data root.
    ///
    /// Uses `data_root` when set, otherwise searches the default locations
    /// (see [`search_bases`]).
    pub fn layout(&self) -> Result<DataLayout> {
        let root = match &self.data_root {
            Some(root) if root.is_dir() => root.clone(),
            Some(root) => {
                return Err(CacheError::DataRootNotFound {
                    name: self.data_root_name.clone(),
                    searched: vec![root.clone()],
                });
            }
            None => detect_data_root(&self.data_root_name, &search_bases())?,
        };
        Ok(DataLayout::new(&root, self))
    }
}

/// Concrete file locations for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct DataLayout {
    pub root: PathBuf,
    pub cities_file: PathBuf,
    pub meteo_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub output_file: PathBuf,
}

impl DataLayout {
    pub fn new(root: &Path, config: &CacheConfig) -> Self {
        let cache_dir = root.join(&config.cache_dir);
        DataLayout {
            root: root.to_path_buf(),
            cities_file: root.join(&config.cities_file),
            meteo_dir: root.join(&config.meteo_dir),
            output_file: cache_dir.join(&config.output_file),
            cache_dir,
        }
    }
}

/// Base directories probed for the data root, in priority order: the
/// directory holding the executable, then the current working directory.
pub fn search_bases() -> Vec<PathBuf> {
    let mut bases = Vec::new();
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        bases.push(exe_dir);
    }
    if let Ok(cwd) = std::env::current_dir() {
        if !bases.contains(&cwd) {
            bases.push(cwd);
        }
    }
    bases
}

/// Finds `<base>/<name>` or `<base>/../<name>` for the first base where
/// either exists.
pub fn detect_data_root(name: &str, bases: &[PathBuf]) -> Result<PathBuf> {
    let mut searched = Vec::new();
    for base in bases {
        let mut candidates = vec![base.join(name)];
        if let Some(parent) = base.parent() {
            candidates.push(parent.join(name));
        }
        for candidate in candidates {
            if candidate.is_dir() {
                return Ok(candidate);
            }
            searched.push(candidate);
        }
    }
    Err(CacheError::DataRootNotFound {
        name: name.to_string(),
        searched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_layout_paths() {
        let config = CacheConfig::default();
        let layout = DataLayout::new(Path::new("/data/Donnees"), &config);
        assert_eq!(
            layout.cities_file,
            PathBuf::from("/data/Donnees/DonneesVilles/villes_avec_regions.parquet")
        );
        assert_eq!(layout.meteo_dir, PathBuf::from("/data/Donnees/DonneesTempPrecipitation"));
        assert_eq!(
            layout.output_file,
            PathBuf::from("/data/Donnees/Cache_System/historique_pluie_v2_light.parquet")
        );
    }

    #[test]
    fn test_detect_prefers_own_directory() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("dash");
        fs::create_dir_all(base.join("Donnees")).unwrap();
        fs::create_dir_all(dir.path().join("Donnees")).unwrap();

        let root = detect_data_root("Donnees", &[base.clone()]).unwrap();
        assert_eq!(root, base.join("Donnees"));
    }

    #[test]
    fn test_detect_falls_back_to_parent() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("dash");
        fs::create_dir_all(&base).unwrap();
        fs::create_dir_all(dir.path().join("Donnees")).unwrap();

        let root = detect_data_root("Donnees", &[base]).unwrap();
        assert_eq!(root, dir.path().join("Donnees"));
    }

    #[test]
    fn test_search_starts_next_to_executable() {
        let bases = search_bases();
        let exe_dir = std::env::current_exe().unwrap().parent().unwrap().to_path_buf();
        assert_eq!(bases.first(), Some(&exe_dir));
        let cwd = std::env::current_dir().unwrap();
        assert!(bases.contains(&cwd));
    }

    #[test]
    fn test_detect_missing_root() {
        let dir = tempdir().unwrap();
        let err = detect_data_root("Donnees", &[dir.path().to_path_buf()]).unwrap_err();
        assert!(matches!(err, CacheError::DataRootNotFound { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_yaml_config() {
        let yaml = "output_file: light.parquet\nsize_budget_mb: 50\nprofile:\n  aggregation: mean\n  clamp_negative: false\n";
        let config = CacheConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.output_file, PathBuf::from("light.parquet"));
        assert_eq!(config.size_budget_mb, 50.0);
        assert_eq!(config.profile.aggregation, Aggregation::Mean);
        assert!(!config.profile.clamp_negative);
        assert_eq!(config.profile.scale_factor, METERS_TO_MILLIMETERS);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(CacheConfig::from_json(r#"{"variable_candidates": []}"#).is_err());
        assert!(CacheConfig::from_json(r#"{"size_budget_mb": 0}"#).is_err());
        assert!(CacheConfig::from_json(r#"{"profile": {"scale_factor": 0.0}}"#).is_err());
        assert!(CacheConfig::from_json("{ not json").is_err());
    }

    #[test]
    fn test_explicit_missing_root_is_fatal() {
        let config = CacheConfig {
            data_root: Some(PathBuf::from("/definitely/not/here/Donnees")),
            ..CacheConfig::default()
        };
        assert!(matches!(config.layout(), Err(CacheError::DataRootNotFound { .. })));
    }
}
