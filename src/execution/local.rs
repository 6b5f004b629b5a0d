//! Local Script Execution
//!
//! Runs a stage script with bash inside its run directory and waits for
//! it to exit.

use std::path::Path;
use std::process::Stdio;

use log::{debug, error};
use tokio::process::Command;

use crate::error::{FlowError, FlowResult};

/// Captured output of a finished local script.
#[derive(Debug, Clone)]
pub struct LocalOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs `bash <script>` with `working_dir` as the current directory.
///
/// A non-zero exit yields [`FlowError::LocalExecution`] carrying the
/// captured standard error.
pub async fn run_script(script: &Path, working_dir: &Path) -> FlowResult<LocalOutput> {
    debug!(
        "Executing {} in directory: {}",
        script.display(),
        working_dir.display()
    );

    let output = Command::new("bash")
        .arg(script)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .output()
        .await?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if output.status.success() {
        if !stdout.trim().is_empty() {
            debug!("{} output:\n{}", script.display(), stdout);
        }
        Ok(LocalOutput { stdout, stderr })
    } else {
        error!(
            "{} failed with exit code: {:?}",
            script.display(),
            output.status.code()
        );
        if !stderr.trim().is_empty() {
            error!("stderr:\n{}", stderr);
        }
        Err(FlowError::LocalExecution {
            script: script.to_path_buf(),
            code: output.status.code(),
            stderr: stderr.trim().to_string(),
        })
    }
}
