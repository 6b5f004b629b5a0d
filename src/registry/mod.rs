//! Run Registry
//!
//! SQLite-backed store of run metadata and the CyberShake lookup tables the
//! engine needs (sites, velocity models, rupture forecasts, ruptures).
//!
//! Every call runs in its own implicit transaction; concurrent site runs
//! share nothing but the database file. Inserts that may race across runs
//! are idempotent: a duplicate key is swallowed instead of reported.
//!
//! Each pipeline run opens its own [`Registry`] and drops it when the run
//! ends, so the connection is released on every exit path.

mod schema;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};

use crate::error::{FlowError, FlowResult};

/// Status text recorded for freshly registered runs.
pub const RUN_STARTED_STATUS: &str = "SGT Started";

/// User tag recorded for runs registered by this engine.
pub const RUN_USER_TAG: &str = "BSC";

/// Parameters for a new run row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRun {
    pub run_id: i64,
    pub site_id: i64,
    pub erf_id: i64,
    pub model_id: i64,
    pub source_frequency: f64,
    pub frequency: f64,
}

/// A stored run row.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub run_id: i64,
    pub site_id: i64,
    pub erf_id: i64,
    pub sgt_variation_id: i64,
    pub velocity_model_id: i64,
    pub rup_var_scenario_id: i64,
    pub status: String,
    pub status_time: String,
    pub last_user: String,
    pub max_frequency: f64,
    pub low_frequency_cutoff: f64,
    pub source_filter_frequency: f64,
}

/// Geometry of one rupture, as stored in the `Ruptures` table.
#[derive(Debug, Clone, PartialEq)]
pub struct RuptureRow {
    pub erf_id: i64,
    pub source_id: i64,
    pub rupture_id: i64,
    pub prob: f64,
    pub mag: f64,
    pub grid_spacing: f64,
    pub num_rows: i64,
    pub num_columns: i64,
    pub start_lat: f64,
    pub start_lon: f64,
    pub start_depth: f64,
    pub end_lat: f64,
    pub end_lon: f64,
    pub end_depth: f64,
}

/// Handle to the run registry database.
///
/// Cheap to clone; clones share one connection guarded by a mutex.
#[derive(Clone)]
pub struct Registry {
    conn: Arc<Mutex<Connection>>,
}

impl Registry {
    /// Opens (or creates) the registry at `path` and bootstraps the schema.
    pub fn open(path: &Path) -> FlowResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        // Several processes or runs may hit the file at once
        conn.busy_timeout(std::time::Duration::from_secs(100))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        for sql in schema::all_schemas() {
            conn.execute_batch(sql)?;
        }

        debug!("Opened registry {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Returns the next free run id: `max(Run_ID) + 1`, or 1 when empty.
    pub fn get_valid_run_id(&self) -> FlowResult<i64> {
        let max: Option<i64> =
            self.conn()
                .query_row("SELECT MAX(Run_ID) FROM CyberShake_Runs", [], |row| row.get(0))?;
        Ok(max.map_or(1, |m| m + 1))
    }

    /// Registers a run. Returns `false` when the run id already exists.
    pub fn add_run_info(&self, run: &NewRun) -> FlowResult<bool> {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let result = self.conn().execute(
            "INSERT INTO CyberShake_Runs (Run_ID, Site_ID, ERF_ID, SGT_Variation_ID,
                 Velocity_Model_ID, Rup_Var_Scenario_ID, Status, Status_Time, Last_User,
                 Max_Frequency, Low_Frequency_Cutoff, SGT_Source_Filter_Frequency)
             VALUES (?1, ?2, ?3, 1, ?4, 1, ?5, ?6, ?7, ?8, ?8, ?9)",
            params![
                run.run_id,
                run.site_id,
                run.erf_id,
                run.model_id,
                RUN_STARTED_STATUS,
                now,
                RUN_USER_TAG,
                run.frequency,
                run.source_frequency
            ],
        );

        match ignore_duplicate(result)? {
            true => {
                info!("Registered run {} (site id {})", run.run_id, run.site_id);
                Ok(true)
            }
            false => {
                debug!("Run {} already registered", run.run_id);
                Ok(false)
            }
        }
    }

    /// Fetches a stored run row.
    pub fn run_record(&self, run_id: i64) -> FlowResult<Option<RunRecord>> {
        let record = self
            .conn()
            .query_row(
                "SELECT Run_ID, Site_ID, ERF_ID, SGT_Variation_ID, Velocity_Model_ID,
                        Rup_Var_Scenario_ID, Status, Status_Time, Last_User,
                        Max_Frequency, Low_Frequency_Cutoff, SGT_Source_Filter_Frequency
                 FROM CyberShake_Runs WHERE Run_ID = ?1",
                params![run_id],
                |row| {
                    Ok(RunRecord {
                        run_id: row.get(0)?,
                        site_id: row.get(1)?,
                        erf_id: row.get(2)?,
                        sgt_variation_id: row.get(3)?,
                        velocity_model_id: row.get(4)?,
                        rup_var_scenario_id: row.get(5)?,
                        status: row.get(6)?,
                        status_time: row.get(7)?,
                        last_user: row.get(8)?,
                        max_frequency: row.get(9)?,
                        low_frequency_cutoff: row.get(10)?,
                        source_filter_frequency: row.get(11)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Registers the hazard dataset produced by `run_id` at `frequency`.
    ///
    /// Returns `false` when an identical dataset is already registered.
    pub fn add_hazard_dataset(&self, run_id: i64, frequency: f64) -> FlowResult<bool> {
        let run = self
            .run_record(run_id)?
            .ok_or_else(|| FlowError::Lookup(format!("run {} is not registered", run_id)))?;

        let result = self.conn().execute(
            "INSERT INTO Hazard_Datasets (ERF_ID, Rup_Var_Scenario_ID, SGT_Variation_ID,
                 Velocity_Model_ID, Prob_Model_ID, Time_Span_ID, Max_Frequency,
                 Low_Frequency_Cutoff)
             VALUES (?1, ?2, ?3, ?4, 1, 1, ?5, ?5)",
            params![
                run.erf_id,
                run.rup_var_scenario_id,
                run.sgt_variation_id,
                run.velocity_model_id,
                frequency
            ],
        );

        let inserted = ignore_duplicate(result)?;
        if inserted {
            info!("Registered hazard dataset for run {}", run_id);
        }
        Ok(inserted)
    }

    /// Resolves a site id from its full or short name.
    pub fn site_id(&self, site: &str) -> FlowResult<Option<i64>> {
        let id = self
            .conn()
            .query_row(
                "SELECT CS_Site_ID FROM CyberShake_Sites
                 WHERE CS_Site_Name = ?1 OR CS_Short_Name = ?1",
                params![site],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Resolves a site's short name from its full or short name.
    pub fn site_short_name(&self, site: &str) -> FlowResult<Option<String>> {
        let name = self
            .conn()
            .query_row(
                "SELECT CS_Short_Name FROM CyberShake_Sites
                 WHERE CS_Site_Name = ?1 OR CS_Short_Name = ?1",
                params![site],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }

    /// Returns a site's `(latitude, longitude)`.
    pub fn site_location(&self, site: &str) -> FlowResult<Option<(f64, f64)>> {
        let location = self
            .conn()
            .query_row(
                "SELECT CS_Site_Lat, CS_Site_Lon FROM CyberShake_Sites
                 WHERE CS_Site_Name = ?1 OR CS_Short_Name = ?1",
                params![site],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(location)
    }

    /// Resolves a velocity model id by exact name.
    pub fn model_id(&self, model: &str) -> FlowResult<Option<i64>> {
        let id = self
            .conn()
            .query_row(
                "SELECT Velocity_Model_ID FROM Velocity_Models WHERE Velocity_Model_Name = ?1",
                params![model],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Resolves a rupture forecast id by substring match on its name.
    pub fn erf_id(&self, erf: &str) -> FlowResult<Option<i64>> {
        let id = self
            .conn()
            .query_row(
                "SELECT ERF_ID FROM ERF_IDs WHERE ERF_Name LIKE '%' || ?1 || '%'",
                params![erf],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Returns every rupture of the given forecast.
    pub fn ruptures(&self, erf_id: i64) -> FlowResult<Vec<RuptureRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT ERF_ID, Source_ID, Rupture_ID, Prob, Mag, Grid_Spacing, Num_Rows,
                    Num_Columns, Start_Lat, Start_Lon, Start_Depth, End_Lat, End_Lon, End_Depth
             FROM Ruptures WHERE ERF_ID = ?1 ORDER BY Source_ID, Rupture_ID",
        )?;
        let rows = stmt.query_map(params![erf_id], |row| {
            Ok(RuptureRow {
                erf_id: row.get(0)?,
                source_id: row.get(1)?,
                rupture_id: row.get(2)?,
                prob: row.get(3)?,
                mag: row.get(4)?,
                grid_spacing: row.get(5)?,
                num_rows: row.get(6)?,
                num_columns: row.get(7)?,
                start_lat: row.get(8)?,
                start_lon: row.get(9)?,
                start_depth: row.get(10)?,
                end_lat: row.get(11)?,
                end_lon: row.get(12)?,
                end_depth: row.get(13)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Writes the rupture list consumed by the synthesis stage.
    ///
    /// The first line holds the entry count; each following line is
    /// `e<erf>_rv<scenario>_<source>_<rupture>.txt <variations> 1 <points> <mag>`.
    pub fn write_rupture_file_list(&self, path: &Path) -> FlowResult<usize> {
        let entries: Vec<(i64, i64, i64, i64, i64, i64, f64)> = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT r.ERF_ID, rv.Rup_Var_Scenario_ID, r.Source_ID, r.Rupture_ID,
                        COUNT(*), r.Num_Points, r.Mag
                 FROM Ruptures AS r
                 INNER JOIN Rupture_Variations AS rv
                     ON r.Source_ID = rv.Source_ID AND r.Rupture_ID = rv.Rupture_ID
                 GROUP BY r.Source_ID, r.Rupture_ID
                 ORDER BY r.Source_ID, r.Rupture_ID",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            out
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = BufWriter::new(File::create(path)?);
        writeln!(file, "{}", entries.len())?;
        for (erf, scenario, source, rupture, count, points, mag) in &entries {
            writeln!(
                file,
                "e{}_rv{}_{}_{}.txt {} 1 {} {}",
                erf, scenario, source, rupture, count, points, mag
            )?;
        }
        file.flush()?;

        info!("Wrote {} ruptures to {}", entries.len(), path.display());
        Ok(entries.len())
    }

    /// Imports one CSV file per table from `dir`.
    ///
    /// The file stem names the table and the first line lists the columns.
    /// Rows that collide with existing keys are skipped.
    pub fn import_csv_dir(&self, dir: &Path) -> FlowResult<usize> {
        let mut entries: Vec<_> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        entries.sort();

        let mut imported = 0;
        for path in entries {
            let Some(table) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let content = fs::read_to_string(&path)?;
            let mut lines = content.lines();
            let Some(header) = lines.next() else {
                warn!("Skipping empty import file {}", path.display());
                continue;
            };

            let columns: Vec<String> = header.split(',').map(|c| quote_ident(c.trim())).collect();
            let placeholders: Vec<String> =
                (1..=columns.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(table),
                columns.join(", "),
                placeholders.join(", ")
            );

            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(&sql)?;
                for line in lines.filter(|l| !l.trim().is_empty()) {
                    let values: Vec<&str> = line.split(',').collect();
                    if ignore_duplicate(stmt.execute(params_from_iter(values)))? {
                        inserted += 1;
                    }
                }
            }
            tx.commit()?;

            debug!("Imported {} rows into {}", inserted, table);
            imported += inserted;
        }

        info!("Imported {} rows from {}", imported, dir.display());
        Ok(imported)
    }
}

/// Maps a duplicate-key failure to `Ok(false)`.
fn ignore_duplicate(result: rusqlite::Result<usize>) -> rusqlite::Result<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation =>
        {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Seeds sites, one model, one forecast, and a single rupture.
    pub fn seed(registry: &Registry) {
        let conn = registry.conn();
        conn.execute_batch(
            "INSERT INTO CyberShake_Sites VALUES (1, 'Site Alpha', 'A', 34.05, -118.25);
             INSERT INTO CyberShake_Sites VALUES (2, 'Site Bravo', 'B', 34.15, -118.10);
             INSERT INTO Velocity_Models VALUES (5, 'CVM-S4', '4.26');
             INSERT INTO ERF_IDs VALUES (36, 'Mean UCERF 2.0', 'test forecast');
             INSERT INTO Ruptures VALUES (36, 1, 0, 'fault', 0.01, 6.5, 1.0, 2, 3, 6,
                                          34.0, -118.0, 0.0, 34.02, -118.02, 10.0);
             INSERT INTO Rupture_Variations VALUES (0, 1, 36, 1, 0, 'lfn0');
             INSERT INTO Rupture_Variations VALUES (1, 1, 36, 1, 0, 'lfn1');",
        )
        .unwrap();
    }
}
