//! Rupture Descriptor Generation
//!
//! Writes one plain-text descriptor per rupture of the selected forecast,
//! laid out as `<root>/<source>/<rupture>/<source>_<rupture>.txt`. Each
//! descriptor holds a short header followed by a regular grid of fault
//! points interpolated between the rupture's start and end coordinates.
//!
//! Directories that already exist are left untouched, so several runs
//! sharing one root only generate each rupture once.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use log::{debug, info};

use crate::config::FocalMechanism;
use crate::error::FlowResult;
use crate::registry::{Registry, RuptureRow};

/// Precision used to snap lat/lon grid steps.
const HORIZONTAL_PRECISION: f64 = 1e-10;

/// Precision used to snap depth grid steps.
const DEPTH_PRECISION: f64 = 1e-2;

/// Generates rupture descriptor files for one forecast.
#[derive(Debug, Clone)]
pub struct RuptureGenerator {
    output_dir: PathBuf,
    mechanism: FocalMechanism,
}

impl RuptureGenerator {
    /// Creates a generator writing under `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            mechanism: FocalMechanism::default(),
        }
    }

    /// Sets the fault orientation written on every grid point.
    pub fn with_focal_mechanism(mut self, mechanism: FocalMechanism) -> Self {
        self.mechanism = mechanism;
        self
    }

    /// Writes descriptors for every rupture of `erf_id`.
    ///
    /// Returns how many descriptors were newly written.
    pub fn generate(&self, registry: &Registry, erf_id: i64, site: &str) -> FlowResult<usize> {
        let rows = registry.ruptures(erf_id)?;
        info!(
            "[{}] Generating rupture files ({} ruptures) under {}",
            site,
            rows.len(),
            self.output_dir.display()
        );

        let mut written = 0;
        for row in &rows {
            if self.write_rupture(row)? {
                written += 1;
            }
        }

        debug!("[{}] {} new rupture descriptors", site, written);
        Ok(written)
    }

    fn write_rupture(&self, row: &RuptureRow) -> FlowResult<bool> {
        let dir = self
            .output_dir
            .join(row.source_id.to_string())
            .join(row.rupture_id.to_string());
        if dir.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(&dir)?;

        let file_path = dir.join(format!("{}_{}.txt", row.source_id, row.rupture_id));
        let mut out = BufWriter::new(File::create(&file_path)?);

        writeln!(out, "Probability = {:?}", row.prob)?;
        writeln!(out, "Magnitude = {:?}", row.mag)?;
        writeln!(out, "GridSpacing = {:?}", row.grid_spacing)?;
        writeln!(out, "NumRows = {}", row.num_rows)?;
        writeln!(out, "NumCols = {}", row.num_columns)?;
        writeln!(out, "#   Lat         Lon         Depth      Rake    Dip     Strike")?;

        let ncols = (row.num_columns - 1).max(0) as usize;
        let nrows = (row.num_rows - 1).max(0) as usize;

        let lats = generate_axis(row.start_lat, row.end_lat, ncols, HORIZONTAL_PRECISION);
        let lons = generate_axis(row.start_lon, row.end_lon, ncols, HORIZONTAL_PRECISION);
        let depths = generate_axis(row.start_depth, row.end_depth, nrows, DEPTH_PRECISION);

        let sep = "    ";
        let m = self.mechanism;
        for depth in &depths {
            for (lat, lon) in lats.iter().zip(lons.iter()).take(ncols) {
                writeln!(
                    out,
                    "{:?}{sep}{:?}{sep}{:?}{sep}{:?}{sep}{:?}{sep}{:?}",
                    lat, lon, depth, m.rake, m.dip, m.strike
                )?;
            }
        }
        out.flush()?;

        Ok(true)
    }
}

/// Builds `num` evenly stepped samples between `start` and `end`.
///
/// The step is truncated to `precision`; the axis always runs upwards from
/// the smaller endpoint (end excluded). Equal endpoints repeat the value.
fn generate_axis(start: f64, end: f64, num: usize, precision: f64) -> Vec<f64> {
    if num == 0 {
        return Vec::new();
    }

    let scale = 1.0 / precision;
    let step = ((end - start).abs() / num as f64 * scale).trunc() / scale;

    if start == end || step <= 0.0 {
        return vec![start; num];
    }

    let (low, high) = if start < end { (start, end) } else { (end, start) };
    let count = ((high - low) / step).ceil() as usize;
    (0..count).map(|i| low + i as f64 * step).collect()
}
