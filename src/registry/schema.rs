//! Registry schema bootstrap.
//!
//! Only the tables and columns the engine reads or writes are declared.
//! Existing CyberShake databases already carry them, in which case every
//! statement is a no-op.

pub(crate) const SITES: &str = "
CREATE TABLE IF NOT EXISTS CyberShake_Sites (
    CS_Site_ID      INTEGER PRIMARY KEY,
    CS_Site_Name    TEXT NOT NULL,
    CS_Short_Name   TEXT NOT NULL,
    CS_Site_Lat     REAL NOT NULL,
    CS_Site_Lon     REAL NOT NULL
);
";

pub(crate) const RUNS: &str = "
CREATE TABLE IF NOT EXISTS CyberShake_Runs (
    Run_ID                      INTEGER PRIMARY KEY,
    Site_ID                     INTEGER NOT NULL,
    ERF_ID                      INTEGER NOT NULL,
    SGT_Variation_ID            INTEGER NOT NULL,
    Velocity_Model_ID           INTEGER NOT NULL,
    Rup_Var_Scenario_ID         INTEGER NOT NULL,
    Status                      TEXT,
    Status_Time                 TEXT,
    Last_User                   TEXT,
    Max_Frequency               REAL,
    Low_Frequency_Cutoff        REAL,
    SGT_Source_Filter_Frequency REAL
);
";

pub(crate) const MODELS: &str = "
CREATE TABLE IF NOT EXISTS Velocity_Models (
    Velocity_Model_ID       INTEGER PRIMARY KEY,
    Velocity_Model_Name     TEXT NOT NULL,
    Velocity_Model_Version  TEXT
);
";

pub(crate) const ERFS: &str = "
CREATE TABLE IF NOT EXISTS ERF_IDs (
    ERF_ID          INTEGER PRIMARY KEY,
    ERF_Name        TEXT NOT NULL,
    ERF_Description TEXT
);
";

pub(crate) const RUPTURES: &str = "
CREATE TABLE IF NOT EXISTS Ruptures (
    ERF_ID          INTEGER NOT NULL,
    Source_ID       INTEGER NOT NULL,
    Rupture_ID      INTEGER NOT NULL,
    Source_Name     TEXT,
    Prob            REAL NOT NULL,
    Mag             REAL NOT NULL,
    Grid_Spacing    REAL NOT NULL,
    Num_Rows        INTEGER NOT NULL,
    Num_Columns     INTEGER NOT NULL,
    Num_Points      INTEGER NOT NULL,
    Start_Lat       REAL NOT NULL,
    Start_Lon       REAL NOT NULL,
    Start_Depth     REAL NOT NULL,
    End_Lat         REAL NOT NULL,
    End_Lon         REAL NOT NULL,
    End_Depth       REAL NOT NULL,
    PRIMARY KEY (ERF_ID, Source_ID, Rupture_ID)
);
";

pub(crate) const RUPTURE_VARIATIONS: &str = "
CREATE TABLE IF NOT EXISTS Rupture_Variations (
    Variation_ID        INTEGER NOT NULL,
    Rup_Var_Scenario_ID INTEGER NOT NULL,
    ERF_ID              INTEGER NOT NULL,
    Source_ID           INTEGER NOT NULL,
    Rupture_ID          INTEGER NOT NULL,
    Rup_Var_LFN         TEXT,
    PRIMARY KEY (Variation_ID, Rup_Var_Scenario_ID, ERF_ID, Source_ID, Rupture_ID)
);
";

pub(crate) const HAZARD_DATASETS: &str = "
CREATE TABLE IF NOT EXISTS Hazard_Datasets (
    Hazard_Dataset_ID       INTEGER PRIMARY KEY AUTOINCREMENT,
    ERF_ID                  INTEGER NOT NULL,
    Rup_Var_Scenario_ID     INTEGER NOT NULL,
    SGT_Variation_ID        INTEGER NOT NULL,
    Velocity_Model_ID       INTEGER NOT NULL,
    Prob_Model_ID           INTEGER NOT NULL,
    Time_Span_ID            INTEGER NOT NULL,
    Max_Frequency           REAL,
    Low_Frequency_Cutoff    REAL,
    UNIQUE (ERF_ID, Rup_Var_Scenario_ID, SGT_Variation_ID, Velocity_Model_ID,
            Prob_Model_ID, Time_Span_ID, Max_Frequency, Low_Frequency_Cutoff)
);
";

pub(crate) fn all_schemas() -> &'static [&'static str] {
    &[SITES, RUNS, MODELS, ERFS, RUPTURES, RUPTURE_VARIATIONS, HAZARD_DATASETS]
}
