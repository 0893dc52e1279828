// levelbak/src/backup/naming.rs
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};

use crate::schedule::Level;

/// Output of one backup run, identified by its file path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub level: Level,
}

impl BackupArtifact {
    /// Key used for ledger lookups; the ledger records the path as given to the backup tool.
    pub fn file_path(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Derives the candidate artifacts for a level at a given instant.
pub trait NamingPolicy: Send + Sync {
    fn artifacts(&self, level: Level, now: &NaiveDateTime) -> Vec<BackupArtifact>;
}

/// `<backup_dir>/<base_name>_<YYYYMMDD>_<HHMM>.L<level>.nbk`
#[derive(Debug, Clone)]
pub struct TimestampNaming {
    backup_dir: PathBuf,
    base_name: String,
}

impl TimestampNaming {
    pub fn new(backup_dir: impl AsRef<Path>, base_name: impl Into<String>) -> Self {
        Self {
            backup_dir: backup_dir.as_ref().to_path_buf(),
            base_name: base_name.into(),
        }
    }
}

impl NamingPolicy for TimestampNaming {
    fn artifacts(&self, level: Level, now: &NaiveDateTime) -> Vec<BackupArtifact> {
        let file_name = format!(
            "{}_{}.L{}.nbk",
            self.base_name,
            now.format("%Y%m%d_%H%M"),
            level
        );
        vec![BackupArtifact {
            path: self.backup_dir.join(file_name),
            level,
        }]
    }
}
