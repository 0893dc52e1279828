//! Chain validation against the database's backup-history ledger.
pub mod firebird;
pub mod ledger;
#[cfg(test)]
pub(crate) mod memory;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::backup::naming::BackupArtifact;
use crate::errors::LedgerQueryError;
pub use firebird::{FirebirdLedger, FirebirdTarget};
pub use ledger::{Ledger, SqlLedger};

/// Ledger status of one candidate artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStatus {
    pub artifact: BackupArtifact,
    pub recorded_count: i64,
}

impl LinkStatus {
    pub fn is_recorded(&self) -> bool {
        self.recorded_count >= 1
    }
}

/// Checks candidate artifacts against the ledger before a chain link is started.
///
/// Owns the ledger session for its whole lifetime; call [`ChainValidator::close`]
/// on shutdown. It never writes to the ledger.
pub struct ChainValidator {
    ledger: Arc<dyn Ledger>,
    query_timeout: Duration,
}

impl ChainValidator {
    pub fn new(ledger: Arc<dyn Ledger>, query_timeout: Duration) -> Self {
        Self {
            ledger,
            query_timeout,
        }
    }

    /// Looks up every artifact, even after a positive, so the report is complete.
    /// Any failed or timed-out lookup fails the whole check.
    pub async fn link_report(&self, artifacts: &[BackupArtifact]) -> Result<Vec<LinkStatus>, LedgerQueryError> {
        let mut report = Vec::with_capacity(artifacts.len());

        for artifact in artifacts {
            let file = artifact.file_path();
            let recorded_count = match timeout(self.query_timeout, self.ledger.count_entries(&file)).await {
                Ok(Ok(count)) => count,
                Ok(Err(source)) => {
                    tracing::error!(file = %file, error = %source, "Ledger lookup failed");
                    return Err(LedgerQueryError::Query { file, source });
                }
                Err(_) => {
                    tracing::error!(file = %file, timeout_ms = self.query_timeout.as_millis() as u64, "Ledger lookup timed out");
                    return Err(LedgerQueryError::Timeout {
                        file,
                        after: self.query_timeout,
                    });
                }
            };

            if recorded_count >= 1 {
                tracing::warn!(file = %file, level = %artifact.level, recorded_count, "Artifact already recorded in ledger");
            } else {
                tracing::debug!(file = %file, level = %artifact.level, "Artifact not yet recorded");
            }

            report.push(LinkStatus {
                artifact: artifact.clone(),
                recorded_count,
            });
        }

        Ok(report)
    }

    pub async fn has_existing_link(&self, artifacts: &[BackupArtifact]) -> Result<bool, LedgerQueryError> {
        let report = self.link_report(artifacts).await?;
        Ok(report.iter().any(LinkStatus::is_recorded))
    }

    pub async fn close(&self) {
        self.ledger.close().await;
    }
}
