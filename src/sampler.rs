//! Nearest-neighbour sampling of grid cells at city locations.
//!
//! No interpolation is performed: many cities sit close to coastlines or
//! borders where blending neighbouring cells would mix signals the grid does
//! not resolve. Each city takes the value of exactly one grid node.

use crate::error::{CacheError, Result};
use crate::field::{Block, GriddedField, Window, check_monotonic};
use std::ops::Range;

/// Index of the node of a strictly monotonic axis closest to `target`.
///
/// Works for ascending and descending axes. Equidistant targets resolve to
/// the lower index; targets beyond either end clamp to the edge node.
pub fn nearest_index(axis: &[f64], target: f64) -> usize {
    let n = axis.len();
    if n <= 1 {
        return 0;
    }
    let ascending = axis[0] < axis[n - 1];
    let pos = if ascending {
        axis.partition_point(|&v| v < target)
    } else {
        axis.partition_point(|&v| v > target)
    };
    if pos == 0 {
        return 0;
    }
    if pos >= n {
        return n - 1;
    }
    let below = (axis[pos - 1] - target).abs();
    let above = (axis[pos] - target).abs();
    if above < below { pos } else { pos - 1 }
}

/// Brings a longitude into the convention of the grid (-180..180 or 0..360).
pub fn wrap_longitude(lon: f64, axis: &[f64]) -> f64 {
    let (min, max) = axis
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if max > 180.0 && lon < 0.0 {
        lon + 360.0
    } else if min < 0.0 && lon > 180.0 {
        lon - 360.0
    } else {
        lon
    }
}

/// Whether a longitude axis closes on itself, i.e. its nodes evenly cover
/// the full 360 degrees (0..359.75 at 0.25 degree spacing for example).
pub fn is_periodic(axis: &[f64]) -> bool {
    let n = axis.len();
    if n < 2 {
        return false;
    }
    let spacing = (axis[n - 1] - axis[0]).abs() / (n - 1) as f64;
    (spacing * n as f64 - 360.0).abs() <= spacing * 1e-3
}

/// Angular distance between two longitudes, in [0, 180].
pub fn circular_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

/// Nearest longitude node, measured around the circle on periodic axes.
///
/// On a global grid the first and last nodes are neighbours across the
/// 0/360 seam, so a target just west of 0 resolves to node 0 rather than
/// clamping to the last node.
pub fn nearest_longitude(axis: &[f64], lon: f64) -> usize {
    let idx = nearest_index(axis, wrap_longitude(lon, axis));
    if !is_periodic(axis) {
        return idx;
    }
    let n = axis.len();
    [idx, 0, n - 1]
        .into_iter()
        .map(|i| (circular_distance(axis[i], lon), i))
        .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
        .map(|(_, i)| i)
        .unwrap_or(idx)
}

/// Smallest set of index ranges covering `indices` on an axis of length `n`.
///
/// On a periodic axis the covering arc may cross the seam, in which case it
/// is returned as two ranges (`start..n` then `0..end`).
fn covering_ranges(indices: &[usize], n: usize, periodic: bool) -> Vec<Range<usize>> {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let (Some(&lo), Some(&hi)) = (sorted.first(), sorted.last()) else {
        return vec![0..0];
    };
    if !periodic || sorted.len() == 1 {
        return vec![lo..hi + 1];
    }

    // the arc skips the widest gap between consecutive indices
    let k = sorted.len();
    let widest = (0..k)
        .max_by_key(|&i| ((sorted[(i + 1) % k] + n - sorted[i]) % n, std::cmp::Reverse(i)))
        .unwrap_or(k - 1);
    let start = sorted[(widest + 1) % k];
    let end = sorted[widest];
    if start <= end {
        vec![start..end + 1]
    } else {
        vec![start..n, 0..end + 1]
    }
}

/// Grid cells resolved once for a list of points, in point order.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePlan {
    cells: Vec<(usize, usize)>,
    lat_range: Range<usize>,
    lon_ranges: Vec<Range<usize>>,
}

impl SamplePlan {
    /// Resolves `(lat, lon)` points to their nearest grid cells.
    ///
    /// The plan also records the smallest latitude/longitude index box that
    /// covers every cell, so each year only reads that sub-grid. On a global
    /// longitude axis the box may straddle the 0/360 seam and is then read
    /// as two windows.
    pub fn new(lats: &[f64], lons: &[f64], points: &[(f64, f64)]) -> Result<Self> {
        check_monotonic("lat", lats)?;
        check_monotonic("lon", lons)?;

        let cells: Vec<(usize, usize)> = points
            .iter()
            .map(|&(lat, lon)| (nearest_index(lats, lat), nearest_longitude(lons, lon)))
            .collect();

        let lat_idx: Vec<usize> = cells.iter().map(|c| c.0).collect();
        let lon_idx: Vec<usize> = cells.iter().map(|c| c.1).collect();
        let lat_range = covering_ranges(&lat_idx, lats.len(), false)
            .into_iter()
            .next()
            .unwrap_or(0..0);
        let lon_ranges = covering_ranges(&lon_idx, lons.len(), is_periodic(lons));

        Ok(SamplePlan {
            cells,
            lat_range,
            lon_ranges,
        })
    }

    pub fn cells(&self) -> &[(usize, usize)] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Windows covering every planned cell over a time range: one, or two
    /// when the cells straddle the longitude seam.
    pub fn windows(&self, time: Range<usize>) -> Vec<Window> {
        self.lon_ranges
            .iter()
            .map(|lon| Window {
                time: time.clone(),
                lat: self.lat_range.clone(),
                lon: lon.clone(),
            })
            .collect()
    }

    /// Number of longitude columns read per step.
    pub fn lon_width(&self) -> usize {
        self.lon_ranges.iter().map(|r| r.len()).sum()
    }

    /// Reads the planned windows of `field` over `time` and samples them.
    pub fn read(&self, field: &dyn GriddedField, time: Range<usize>) -> Result<Sampled> {
        let blocks = self
            .windows(time)
            .iter()
            .map(|w| field.read_block(w))
            .collect::<Result<Vec<Block>>>()?;
        self.sample(&blocks)
    }

    /// Extracts every planned cell from blocks sharing one time range.
    pub fn sample(&self, blocks: &[Block]) -> Result<Sampled> {
        let steps = blocks.first().map(Block::steps).unwrap_or(0);
        if blocks.iter().any(|b| b.steps() != steps) {
            return Err(CacheError::MalformedBlock(
                "blocks cover different time ranges".to_string(),
            ));
        }
        let mut values = Vec::with_capacity(steps * self.cells.len());
        for step in 0..steps {
            for &(y, x) in &self.cells {
                let value = blocks
                    .iter()
                    .find_map(|b| b.get(step, y, x))
                    .ok_or_else(|| {
                        CacheError::MalformedBlock(format!("cell ({y}, {x}) outside every block window"))
                    })?;
                values.push(value);
            }
        }
        Ok(Sampled {
            steps,
            points: self.cells.len(),
            values,
        })
    }
}

/// Time x point matrix of sampled values, time-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Sampled {
    steps: usize,
    points: usize,
    values: Vec<f64>,
}

impl Sampled {
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn value(&self, step: usize, point: usize) -> f64 {
        self.values[step * self.points + point]
    }

    /// Values of one step, in point order.
    pub fn row(&self, step: usize) -> &[f64] {
        &self.values[step * self.points..(step + 1) * self.points]
    }

    /// Full series of one point.
    pub fn series(&self, point: usize) -> Vec<f64> {
        (0..self.steps).map(|s| self.value(s, point)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_ascending() {
        let axis = [40.0, 40.25, 40.5, 40.75];
        assert_eq!(nearest_index(&axis, 40.3), 1);
        assert_eq!(nearest_index(&axis, 40.4), 2);
        assert_eq!(nearest_index(&axis, 40.75), 3);
    }

    #[test]
    fn test_nearest_descending() {
        let axis = [51.0, 50.75, 50.5, 50.25];
        assert_eq!(nearest_index(&axis, 50.7), 1);
        assert_eq!(nearest_index(&axis, 50.3), 3);
        assert_eq!(nearest_index(&axis, 51.0), 0);
    }

    #[test]
    fn test_nearest_tie_takes_lower_index() {
        assert_eq!(nearest_index(&[0.0, 1.0, 2.0], 0.5), 0);
        assert_eq!(nearest_index(&[2.0, 1.0, 0.0], 1.5), 0);
    }

    #[test]
    fn test_nearest_clamps_outside_grid() {
        let axis = [0.0, 1.0, 2.0];
        assert_eq!(nearest_index(&axis, -10.0), 0);
        assert_eq!(nearest_index(&axis, 99.0), 2);
        assert_eq!(nearest_index(&[5.0], 99.0), 0);
    }

    #[test]
    fn test_wrap_longitude() {
        let east = [0.0, 90.0, 180.0, 270.0, 359.75];
        assert_eq!(wrap_longitude(-1.5, &east), 358.5);
        assert_eq!(wrap_longitude(2.0, &east), 2.0);
        let centered = [-180.0, 0.0, 179.75];
        assert_eq!(wrap_longitude(-1.5, &centered), -1.5);
        assert_eq!(wrap_longitude(200.0, &centered), -160.0);
    }

    fn global_quarter_degree() -> Vec<f64> {
        (0..1440).map(|i| i as f64 * 0.25).collect()
    }

    #[test]
    fn test_periodic_axis_detection() {
        assert!(is_periodic(&global_quarter_degree()));
        assert!(is_periodic(&[-180.0, -90.0, 0.0, 90.0]));
        assert!(!is_periodic(&[2.0, 2.25, 2.5, 2.75]));
        assert!(!is_periodic(&[0.0]));
    }

    #[test]
    fn test_nearest_longitude_across_seam() {
        let lons = global_quarter_degree();
        assert_eq!(nearest_longitude(&lons, -0.05), 0);
        assert_eq!(nearest_longitude(&lons, 359.9), 0);
        assert_eq!(nearest_longitude(&lons, -0.2), 1439);
        // equidistant from 359.75 and 0.0
        assert_eq!(nearest_longitude(&lons, -0.125), 0);
        assert_eq!(nearest_longitude(&lons, 2.35), 9);

        // regional grids keep clamping to the edge
        assert_eq!(nearest_longitude(&[2.0, 2.25, 2.5], -10.0), 0);
    }

    #[test]
    fn test_window_straddles_seam() {
        let lats = [51.0, 50.0, 49.0, 48.0, 47.0, 46.0, 45.0, 44.0, 43.0];
        let lons = global_quarter_degree();
        // Brest, Paris, Strasbourg
        let plan = SamplePlan::new(&lats, &lons, &[(48.39, -4.49), (48.85, 2.35), (48.58, 7.75)]).unwrap();
        assert_eq!(plan.cells()[0].1, 1422);
        assert_eq!(plan.cells()[2].1, 31);

        let windows = plan.windows(0..1);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].lon, 1422..1440);
        assert_eq!(windows[1].lon, 0..32);
        assert_eq!(plan.lon_width(), 50);
    }

    #[test]
    fn test_window_without_seam_is_single() {
        let lats = [50.0, 49.0];
        let lons = global_quarter_degree();
        let plan = SamplePlan::new(&lats, &lons, &[(49.0, 2.35), (50.0, 7.75), (49.5, 180.0)]).unwrap();
        let windows = plan.windows(0..1);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].lon, 9..721);
        assert_eq!(windows[0].lat, 0..2);
    }
}
