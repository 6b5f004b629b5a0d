//! Per-run CyberShake configuration file.
//!
//! The CyberShake python tools read `cybershake.cfg` and `config.py` from
//! their working directory. Each run directory gets its own copy so runs
//! never step on each other's scratch or log paths.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::FlowResult;

/// File name expected by the CyberShake tools.
pub const CYBERSHAKE_CFG: &str = "cybershake.cfg";

/// Launcher used by the CyberShake MPI wrappers.
const MPI_COMMAND: &str = "srun";

/// Writes `cybershake.cfg` into `run_dir` and copies the installation's
/// `config.py` next to it when present.
///
/// Returns the path of the written configuration file.
pub fn write_site_cfg(
    run_dir: &Path,
    cybershake_root: &Path,
    rupture_root: &Path,
) -> FlowResult<PathBuf> {
    let cfg_path = run_dir.join(CYBERSHAKE_CFG);
    let mut out = BufWriter::new(File::create(&cfg_path)?);

    writeln!(out, "CS_PATH = {}", cybershake_root.display())?;
    writeln!(out, "SCRATCH_PATH = {}", run_dir.join("scratch").display())?;
    writeln!(out, "TMP_PATH = {}", run_dir.join("tmp").display())?;
    writeln!(out, "RUPTURE_ROOT = {}", rupture_root.display())?;
    writeln!(out, "MPI_CMD = {}", MPI_COMMAND)?;
    writeln!(out, "LOG_PATH = {}", run_dir.join("logs").display())?;
    out.flush()?;

    let source = cybershake_root.join("config.py");
    if source.is_file() {
        fs::copy(&source, run_dir.join("config.py"))?;
        debug!("Copied {} into {}", source.display(), run_dir.display());
    } else {
        warn!(
            "CyberShake config.py not found at {}; tools will use their defaults",
            source.display()
        );
    }

    Ok(cfg_path)
}
