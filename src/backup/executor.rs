// levelbak/src/backup/executor.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use which::which;

use super::naming::BackupArtifact;
use crate::schedule::Level;

/// Performs the physical backup once the chain check has passed.
#[async_trait]
pub trait BackupExecutor: Send + Sync {
    async fn execute(&self, level: Level, artifacts: &[BackupArtifact]) -> Result<()>;
}

/// Runs the database's incremental backup utility (`nbackup`) once per artifact.
#[derive(Debug, Clone)]
pub struct NbackupExecutor {
    pub tool: PathBuf,
    pub database: String,
    pub user: String,
    pub password: String,
    pub direct_io: Option<bool>,
}

/// Resolves the configured backup tool: an existing path is used as is, a bare
/// name is looked up in `PATH`.
pub fn find_backup_tool(configured: &Path) -> Result<PathBuf> {
    if configured.is_file() {
        return Ok(configured.to_path_buf());
    }
    which(configured).with_context(|| {
        format!(
            "Backup tool {} not found. Set backup_tool in config.json to its full path or add it to PATH.",
            configured.display()
        )
    })
}

impl NbackupExecutor {
    fn arguments(&self, level: Level, artifact: &BackupArtifact) -> Vec<String> {
        let mut args = vec![
            "-U".to_string(),
            self.user.clone(),
            "-P".to_string(),
            self.password.clone(),
        ];
        if let Some(direct_io) = self.direct_io {
            args.push("-D".to_string());
            args.push(if direct_io { "ON" } else { "OFF" }.to_string());
        }
        args.push("-B".to_string());
        args.push(level.to_string());
        args.push(self.database.clone());
        args.push(artifact.file_path());
        args
    }
}

#[async_trait]
impl BackupExecutor for NbackupExecutor {
    async fn execute(&self, level: Level, artifacts: &[BackupArtifact]) -> Result<()> {
        let tool = find_backup_tool(&self.tool)?;

        for artifact in artifacts {
            if let Some(parent) = artifact.path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create backup directory: {}", parent.display())
                    })?;
                }
            }

            tracing::info!(tool = %tool.display(), level = %level, file = %artifact.path.display(), "Starting backup");
            let output = Command::new(&tool)
                .args(self.arguments(level, artifact))
                .output()
                .with_context(|| format!("Failed to execute {} for {}", tool.display(), artifact.path.display()))?;

            if !output.status.success() {
                return Err(anyhow::anyhow!(
                    "Backup of level {} to {} failed with status: {}\nStdout: {}\nStderr: {}",
                    level,
                    artifact.path.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                ));
            }
            tracing::info!(level = %level, file = %artifact.path.display(), "Backup completed");
        }

        Ok(())
    }
}
