//! Checkpoint Persistence
//!
//! Each pipeline run keeps a single-token checkpoint file inside its own
//! working directory naming the last stage whose postprocess completed.
//! A resumed run reads it back to decide where to pick up.
//!
//! No locking is involved: a working directory belongs to exactly one
//! run at a time.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::definition::StageId;

/// Default checkpoint file name inside a run directory.
pub const DEFAULT_CHECKPOINT_FILE: &str = "stage.txt";

/// Handle to the checkpoint file of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    /// Creates a handle for `<working_dir>/<file_name>`.
    pub fn new(working_dir: &Path, file_name: &str) -> Self {
        Self {
            path: working_dir.join(file_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the last completed stage token.
    ///
    /// Returns `None` when the file is absent or its first line is empty.
    pub fn load(&self) -> io::Result<Option<String>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let token = content
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty());

        if let Some(ref t) = token {
            info!("Loaded checkpoint '{}' from {}", t, self.path.display());
        }
        Ok(token)
    }

    /// Records `stage` as the last completed stage, overwriting any
    /// previous token.
    pub fn save(&self, stage: StageId) -> io::Result<()> {
        fs::write(&self.path, stage.token())?;
        debug!("Checkpoint {} -> {}", self.path.display(), stage);
        Ok(())
    }

    /// Removes the checkpoint file if it exists.
    pub fn clear(&self) -> io::Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            info!("Deleted checkpoint: {}", self.path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_checkpoint_is_none() {
        let dir = tempdir().unwrap();
        let checkpoint = Checkpoint::new(dir.path(), DEFAULT_CHECKPOINT_FILE);
        assert_eq!(checkpoint.load().unwrap(), None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let checkpoint = Checkpoint::new(dir.path(), DEFAULT_CHECKPOINT_FILE);

        checkpoint.save(StageId::AwpX).unwrap();
        assert_eq!(checkpoint.load().unwrap().as_deref(), Some("AWPX"));

        checkpoint.save(StageId::AwpY).unwrap();
        assert_eq!(checkpoint.load().unwrap().as_deref(), Some("AWPY"));

        let raw = fs::read_to_string(dir.path().join("stage.txt")).unwrap();
        assert_eq!(raw, "AWPY");
    }

    #[test]
    fn test_load_reads_first_line_only() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("stage.txt"), "postX\ngarbage\n").unwrap();

        let checkpoint = Checkpoint::new(dir.path(), "stage.txt");
        assert_eq!(checkpoint.load().unwrap().as_deref(), Some("postX"));
    }

    #[test]
    fn test_empty_file_is_none() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("stage.txt"), "").unwrap();

        let checkpoint = Checkpoint::new(dir.path(), "stage.txt");
        assert_eq!(checkpoint.load().unwrap(), None);
    }

    #[test]
    fn test_clear() {
        let dir = tempdir().unwrap();
        let checkpoint = Checkpoint::new(dir.path(), "custom.txt");
        checkpoint.save(StageId::RupVar).unwrap();
        assert!(checkpoint.path().exists());

        checkpoint.clear().unwrap();
        assert!(!checkpoint.path().exists());
        // Clearing twice is fine
        checkpoint.clear().unwrap();
    }
}
