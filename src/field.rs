//! # Gridded Field Access
//!
//! A gridded field is a 3-D array indexed by (time, latitude, longitude). The
//! pipeline never loads it whole: callers describe a [`Window`] and only that
//! hyperslab is materialized as a [`Block`].
//!
//! ## Implementations
//!
//! - [`NetcdfField`]: one or more NetCDF files combined along time
//! - [`MemoryField`]: an in-memory archive, used for synthetic data

use crate::calendar::{TimeUnits, check_calendar};
use crate::error::{CacheError, Result};
use chrono::NaiveDateTime;
use log::{debug, warn};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Recognized names for each coordinate role, normalized name first.
pub const TIME_ALIASES: [&str; 2] = ["time", "valid_time"];
pub const LAT_ALIASES: [&str; 2] = ["lat", "latitude"];
pub const LON_ALIASES: [&str; 2] = ["lon", "longitude"];

const GRID_TOLERANCE: f64 = 1e-6;

/// Index ranges selecting a hyperslab of the field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub time: Range<usize>,
    pub lat: Range<usize>,
    pub lon: Range<usize>,
}

impl Window {
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.time.len(), self.lat.len(), self.lon.len())
    }

    pub fn len(&self) -> usize {
        let (t, y, x) = self.shape();
        t * y * x
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Materialized values of a [`Window`], time-major then latitude then
/// longitude. Missing values are NaN.
#[derive(Debug, Clone)]
pub struct Block {
    window: Window,
    values: Vec<f64>,
}

impl Block {
    pub fn new(window: Window, values: Vec<f64>) -> Result<Self> {
        if values.len() != window.len() {
            return Err(CacheError::MalformedBlock(format!(
                "window {:?} needs {} values, got {}",
                window.shape(),
                window.len(),
                values.len()
            )));
        }
        Ok(Block { window, values })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn steps(&self) -> usize {
        self.window.time.len()
    }

    /// Value at a step of the block and absolute grid indices.
    ///
    /// Returns `None` when the indices fall outside the window.
    pub fn get(&self, step: usize, lat_idx: usize, lon_idx: usize) -> Option<f64> {
        let w = &self.window;
        if step >= w.time.len() || !w.lat.contains(&lat_idx) || !w.lon.contains(&lon_idx) {
            return None;
        }
        let (_, ny, nx) = w.shape();
        let idx = step * ny * nx + (lat_idx - w.lat.start) * nx + (lon_idx - w.lon.start);
        self.values.get(idx).copied()
    }
}

/// Demand-driven access to a (time, lat, lon) field.
pub trait GriddedField {
    fn latitudes(&self) -> &[f64];
    fn longitudes(&self) -> &[f64];
    /// Sorted, unique timestamps of the time axis
    fn timestamps(&self) -> &[NaiveDateTime];
    /// Materializes one hyperslab
    fn read_block(&self, window: &Window) -> Result<Block>;

    fn check_window(&self, window: &Window) -> Result<()> {
        let dims = [
            ("time", &window.time, self.timestamps().len()),
            ("lat", &window.lat, self.latitudes().len()),
            ("lon", &window.lon, self.longitudes().len()),
        ];
        for (name, range, len) in dims {
            if range.start > range.end || range.end > len {
                return Err(CacheError::MalformedBlock(format!(
                    "{name} range {range:?} outside 0..{len}"
                )));
            }
        }
        Ok(())
    }
}

/// Field held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryField {
    timestamps: Vec<NaiveDateTime>,
    lats: Vec<f64>,
    lons: Vec<f64>,
    values: Vec<f64>,
}

impl MemoryField {
    /// `values` is laid out time-major, then latitude, then longitude.
    pub fn new(
        timestamps: Vec<NaiveDateTime>,
        lats: Vec<f64>,
        lons: Vec<f64>,
        values: Vec<f64>,
    ) -> Result<Self> {
        let expected = timestamps.len() * lats.len() * lons.len();
        if values.len() != expected {
            return Err(CacheError::MalformedBlock(format!(
                "expected {} values for {}x{}x{} grid, got {}",
                expected,
                timestamps.len(),
                lats.len(),
                lons.len(),
                values.len()
            )));
        }
        if timestamps.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CacheError::NonMonotonicAxis {
                axis: "time".to_string(),
            });
        }
        Ok(MemoryField {
            timestamps,
            lats,
            lons,
            values,
        })
    }
}

impl GriddedField for MemoryField {
    fn latitudes(&self) -> &[f64] {
        &self.lats
    }

    fn longitudes(&self) -> &[f64] {
        &self.lons
    }

    fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    fn read_block(&self, window: &Window) -> Result<Block> {
        self.check_window(window)?;
        let (ny, nx) = (self.lats.len(), self.lons.len());
        let mut values = Vec::with_capacity(window.len());
        for t in window.time.clone() {
            for y in window.lat.clone() {
                let row = t * ny * nx + y * nx;
                values.extend_from_slice(&self.values[row + window.lon.start..row + window.lon.end]);
            }
        }
        Block::new(window.clone(), values)
    }
}

/// Packing attributes of a data variable.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Packing {
    scale: f64,
    offset: f64,
    fill: Option<f64>,
    missing: Option<f64>,
}

impl Packing {
    fn from_variable(var: &netcdf::Variable) -> Self {
        Packing {
            scale: attr_f64(var, "scale_factor").unwrap_or(1.0),
            offset: attr_f64(var, "add_offset").unwrap_or(0.0),
            fill: attr_f64(var, "_FillValue"),
            missing: attr_f64(var, "missing_value"),
        }
    }

    fn unpack(&self, raw: f64) -> f64 {
        if self.fill == Some(raw) || self.missing == Some(raw) || !raw.is_finite() {
            f64::NAN
        } else {
            raw * self.scale + self.offset
        }
    }
}

struct SourceFile {
    path: PathBuf,
    file: netcdf::File,
    variable: String,
    packing: Packing,
}

/// NetCDF archive spread over one or more files sharing the same grid.
///
/// File handles stay open for the lifetime of the field and are released by
/// [`NetcdfField::close`] (or on drop).
pub struct NetcdfField {
    sources: Vec<SourceFile>,
    lats: Vec<f64>,
    lons: Vec<f64>,
    timestamps: Vec<NaiveDateTime>,
    /// (source, local index) for every global time index
    steps: Vec<(usize, usize)>,
}

impl NetcdfField {
    /// Opens every `*.nc` file in `dir` and combines them along time.
    ///
    /// # Errors
    ///
    /// All errors here are setup errors: missing or empty directory, missing
    /// variable or coordinates, unexpected dimension layout, undecodable time
    /// axis, or files whose grids disagree.
    pub fn open_dir(dir: &Path, candidates: &[String]) -> Result<Self> {
        if !dir.is_dir() {
            return Err(CacheError::MeteoDirNotFound(dir.to_path_buf()));
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "nc"))
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(CacheError::NoNetCdfFiles(dir.to_path_buf()));
        }
        Self::open_files(&paths, candidates)
    }

    /// Opens the given NetCDF files and combines them along time.
    ///
    /// The time axis of the result is sorted. When several files hold the
    /// same timestamp, the step from the earliest file in `paths` is kept.
    ///
    /// # Arguments
    ///
    /// * `paths` - NetCDF files, in priority order
    /// * `candidates` - Data variable names tried in order in each file
    ///
    /// # Returns
    ///
    /// Returns a field whose file handles stay open until [`NetcdfField::close`].
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - A file cannot be opened or holds none of the `candidates`
    /// - The variable is not laid out as (time, lat, lon)
    /// - A coordinate is missing or not strictly monotonic
    /// - The time coordinate has no units or uses an unsupported calendar
    /// - The files do not share the same latitude/longitude grid
    pub fn open_files(paths: &[PathBuf], candidates: &[String]) -> Result<Self> {
        let mut sources = Vec::with_capacity(paths.len());
        let mut grid: Option<(Vec<f64>, Vec<f64>)> = None;
        let mut all_steps: Vec<(NaiveDateTime, usize, usize)> = Vec::new();

        for path in paths {
            let opened = open_source(path, candidates)?;
            match &grid {
                None => grid = Some((opened.lats, opened.lons)),
                Some((lats, lons)) => {
                    if !same_axis(lats, &opened.lats) || !same_axis(lons, &opened.lons) {
                        return Err(CacheError::GridMismatch(format!(
                            "{} does not share the grid of {}",
                            path.display(),
                            paths[0].display()
                        )));
                    }
                }
            }
            let source_idx = sources.len();
            all_steps.extend(
                opened
                    .timestamps
                    .into_iter()
                    .enumerate()
                    .map(|(local, ts)| (ts, source_idx, local)),
            );
            sources.push(opened.source);
        }

        let (lats, lons) = grid.unwrap_or_default();
        // stable sort keeps the earlier file first among equal timestamps
        all_steps.sort_by_key(|(ts, _, _)| *ts);
        let before = all_steps.len();
        all_steps.dedup_by_key(|(ts, _, _)| *ts);
        if all_steps.len() < before {
            warn!(
                "Dropped {} duplicated time steps across files",
                before - all_steps.len()
            );
        }

        let timestamps = all_steps.iter().map(|(ts, _, _)| *ts).collect();
        let steps = all_steps.iter().map(|&(_, s, l)| (s, l)).collect();

        Ok(NetcdfField {
            sources,
            lats,
            lons,
            timestamps,
            steps,
        })
    }

    pub fn file_count(&self) -> usize {
        self.sources.len()
    }

    /// Name of the data variable in the first file.
    pub fn variable_name(&self) -> &str {
        self.sources.first().map(|s| s.variable.as_str()).unwrap_or("")
    }

    /// Closes every file handle.
    pub fn close(self) -> Result<()> {
        for source in self.sources {
            debug!("Closing {}", source.path.display());
            source.file.close()?;
        }
        Ok(())
    }

    /// Splits a global time range into runs of consecutive steps in one file.
    fn segments(&self, time: &Range<usize>) -> Vec<(usize, Range<usize>)> {
        let mut segments: Vec<(usize, Range<usize>)> = Vec::new();
        for &(source, local) in &self.steps[time.clone()] {
            match segments.last_mut() {
                Some((s, range)) if *s == source && range.end == local => range.end += 1,
                _ => segments.push((source, local..local + 1)),
            }
        }
        segments
    }
}

impl GriddedField for NetcdfField {
    fn latitudes(&self) -> &[f64] {
        &self.lats
    }

    fn longitudes(&self) -> &[f64] {
        &self.lons
    }

    fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    fn read_block(&self, window: &Window) -> Result<Block> {
        self.check_window(window)?;
        if window.is_empty() {
            return Block::new(window.clone(), Vec::new());
        }
        let mut values = Vec::with_capacity(window.len());
        for (source_idx, local) in self.segments(&window.time) {
            let source = &self.sources[source_idx];
            let var = source.file.variable(&source.variable).ok_or_else(|| {
                CacheError::MalformedBlock(format!(
                    "variable '{}' vanished from {}",
                    source.variable,
                    source.path.display()
                ))
            })?;
            let raw = var.get_values::<f64, _>((local, window.lat.clone(), window.lon.clone()))?;
            values.extend(raw.into_iter().map(|v| source.packing.unpack(v)));
        }
        Block::new(window.clone(), values)
    }
}

struct OpenedSource {
    source: SourceFile,
    lats: Vec<f64>,
    lons: Vec<f64>,
    timestamps: Vec<NaiveDateTime>,
}

fn open_source(path: &Path, candidates: &[String]) -> Result<OpenedSource> {
    debug!("Opening NetCDF file: {}", path.display());
    let file = netcdf::open(path)?;
    let file_name = path.display().to_string();

    let variable = candidates
        .iter()
        .find(|name| file.variable(name).is_some())
        .cloned()
        .ok_or_else(|| CacheError::VariableNotFound {
            file: file_name.clone(),
            candidates: candidates.to_vec(),
        })?;

    let (packing, dimensions) = {
        let var = file.variable(&variable).ok_or_else(|| CacheError::VariableNotFound {
            file: file_name.clone(),
            candidates: candidates.to_vec(),
        })?;
        let dimensions: Vec<String> = var.dimensions().iter().map(|d| d.name().to_string()).collect();
        (Packing::from_variable(&var), dimensions)
    };

    let roles: Vec<Option<&str>> = dimensions.iter().map(|d| normalize_dimension(d)).collect();
    if roles != [Some("time"), Some("lat"), Some("lon")] {
        return Err(CacheError::DimensionLayout {
            variable,
            dimensions,
        });
    }

    let lats = read_coordinate(&file, &file_name, &LAT_ALIASES)?;
    let lons = read_coordinate(&file, &file_name, &LON_ALIASES)?;
    check_monotonic("lat", &lats)?;
    check_monotonic("lon", &lons)?;
    let timestamps = read_time(&file, &file_name)?;

    debug!(
        "{}: variable '{}', {} steps, {}x{} grid",
        file_name,
        variable,
        timestamps.len(),
        lats.len(),
        lons.len()
    );

    Ok(OpenedSource {
        source: SourceFile {
            path: path.to_path_buf(),
            file,
            variable,
            packing,
        },
        lats,
        lons,
        timestamps,
    })
}

/// Maps a dimension or coordinate name to its normalized role.
pub fn normalize_dimension(name: &str) -> Option<&'static str> {
    [&TIME_ALIASES, &LAT_ALIASES, &LON_ALIASES]
        .into_iter()
        .find(|aliases| aliases.iter().any(|alias| *alias == name))
        .map(|aliases| aliases[0])
}

fn find_coordinate<'f>(
    file: &'f netcdf::File,
    file_name: &str,
    aliases: &[&str],
) -> Result<netcdf::Variable<'f>> {
    aliases
        .iter()
        .find_map(|name| file.variable(name))
        .ok_or_else(|| CacheError::CoordinateNotFound {
            file: file_name.to_string(),
            coordinate: aliases[0].to_string(),
        })
}

fn read_coordinate(file: &netcdf::File, file_name: &str, aliases: &[&str]) -> Result<Vec<f64>> {
    let var = find_coordinate(file, file_name, aliases)?;
    Ok(var.get_values::<f64, _>(..)?)
}

fn read_time(file: &netcdf::File, file_name: &str) -> Result<Vec<NaiveDateTime>> {
    let var = find_coordinate(file, file_name, &TIME_ALIASES)?;
    let units = attr_string(&var, "units").ok_or_else(|| {
        CacheError::TimeDecode(format!("time coordinate of {file_name} has no units"))
    })?;
    check_calendar(attr_string(&var, "calendar").as_deref())?;
    let offsets = var
        .get_values::<f64, _>(..)
        .map_err(|e| CacheError::TimeDecode(format!("{file_name}: {e}")))?;
    let timestamps = TimeUnits::parse(&units)?.decode_all(&offsets)?;
    if timestamps.windows(2).any(|w| w[0] >= w[1]) {
        return Err(CacheError::NonMonotonicAxis {
            axis: format!("time ({file_name})"),
        });
    }
    Ok(timestamps)
}

/// Axes must be non-empty and strictly increasing or strictly decreasing.
pub fn check_monotonic(axis: &str, values: &[f64]) -> Result<()> {
    let increasing = values.windows(2).all(|w| w[0] < w[1]);
    let decreasing = values.windows(2).all(|w| w[0] > w[1]);
    if values.is_empty() || !(increasing || decreasing) {
        return Err(CacheError::NonMonotonicAxis {
            axis: axis.to_string(),
        });
    }
    Ok(())
}

fn same_axis(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= GRID_TOLERANCE)
}

fn attr_f64(var: &netcdf::Variable, name: &str) -> Option<f64> {
    use netcdf::AttributeValue as V;
    var.attribute_value(name)
        .and_then(|r| r.ok())
        .and_then(|v| match v {
            V::Double(d) => Some(d),
            V::Float(f) => Some(f as f64),
            V::Short(s) => Some(s as f64),
            V::Ushort(s) => Some(s as f64),
            V::Int(i) => Some(i as f64),
            V::Uint(i) => Some(i as f64),
            V::Longlong(i) => Some(i as f64),
            V::Ulonglong(i) => Some(i as f64),
            V::Schar(c) => Some(c as f64),
            V::Uchar(c) => Some(c as f64),
            _ => None,
        })
}

fn attr_string(var: &netcdf::Variable, name: &str) -> Option<String> {
    var.attribute_value(name)
        .and_then(|r| r.ok())
        .and_then(|v| match v {
            netcdf::AttributeValue::Str(s) => Some(s),
            _ => None,
        })
}
