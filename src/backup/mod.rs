pub mod executor;
pub mod naming;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::chain::ChainValidator;
use crate::errors::{ChainError, OrchestratorError, SelectError};
use crate::schedule::{Level, LevelSet};
pub use executor::{BackupExecutor, NbackupExecutor};
pub use naming::{BackupArtifact, NamingPolicy, TimestampNaming};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
    Ran,
    SkippedNoMatch,
    SkippedDuplicateChain,
    Error,
}

/// Structured result of one invocation, for the operator and the exit code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationReport {
    pub executed: bool,
    pub level: Option<Level>,
    pub reason: Reason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl InvocationReport {
    /// Ran or idle; everything else needs an operator.
    pub fn is_success(&self) -> bool {
        matches!(self.reason, Reason::Ran | Reason::SkippedNoMatch)
    }

    /// Nothing was executed because of `message`.
    pub fn failed(level: Option<Level>, message: impl Into<String>) -> Self {
        Self {
            executed: false,
            level,
            reason: Reason::Error,
            message: Some(message.into()),
        }
    }
}

/// One select → chain check → execute pass, evaluated against a single `now`.
///
/// Holds borrowed collaborators only; everything is built once at startup.
pub struct Orchestrator<'a> {
    levels: &'a LevelSet,
    validator: &'a ChainValidator,
    naming: &'a dyn NamingPolicy,
    executor: &'a dyn BackupExecutor,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        levels: &'a LevelSet,
        validator: &'a ChainValidator,
        naming: &'a dyn NamingPolicy,
        executor: &'a dyn BackupExecutor,
    ) -> Self {
        Self {
            levels,
            validator,
            naming,
            executor,
        }
    }

    /// Returns the level that was handed to the executor. No retries happen here.
    pub async fn run(&self, now: &NaiveDateTime) -> Result<Level, OrchestratorError> {
        let level = self.levels.select(now)?;
        self.run_level(level, now).await?;
        Ok(level)
    }

    async fn run_level(&self, level: Level, now: &NaiveDateTime) -> Result<(), OrchestratorError> {
        let artifacts = self.naming.artifacts(level, now);
        tracing::info!(level = %level, now = %now, artifacts = artifacts.len(), "Level selected");

        let report = self.validator.link_report(&artifacts).await?;
        let collided: Vec<String> = report
            .iter()
            .filter(|status| status.is_recorded())
            .map(|status| status.artifact.file_path())
            .collect();
        if !collided.is_empty() {
            return Err(ChainError::DuplicateChain {
                level,
                files: collided,
            }
            .into());
        }

        self.executor
            .execute(level, &artifacts)
            .await
            .map_err(OrchestratorError::Executor)
    }

    /// Like [`Orchestrator::run`], folded into an [`InvocationReport`].
    pub async fn invoke(&self, now: &NaiveDateTime) -> InvocationReport {
        let level = match self.levels.select(now) {
            Ok(level) => level,
            Err(SelectError::NoScheduledLevel) => {
                tracing::info!(now = %now, "No level scheduled, idle tick");
                return InvocationReport {
                    executed: false,
                    level: None,
                    reason: Reason::SkippedNoMatch,
                    message: None,
                };
            }
            Err(err) => {
                tracing::error!(now = %now, error = %err, "Level selection failed");
                return InvocationReport::failed(None, err.to_string());
            }
        };

        match self.run_level(level, now).await {
            Ok(()) => InvocationReport {
                executed: true,
                level: Some(level),
                reason: Reason::Ran,
                message: None,
            },
            Err(err @ OrchestratorError::Chain(_)) => {
                tracing::error!(now = %now, error = %err, "Duplicate backup chain link, investigate before the next run");
                InvocationReport {
                    executed: false,
                    level: Some(level),
                    reason: Reason::SkippedDuplicateChain,
                    message: Some(err.to_string()),
                }
            }
            Err(err) => {
                tracing::error!(now = %now, error = %err, "Backup invocation failed");
                InvocationReport::failed(Some(level), err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::memory::MemoryLedger;
    use crate::errors::LedgerQueryError;
    use crate::schedule::Tick;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<(Level, Vec<BackupArtifact>)>>,
        fail: bool,
    }

    impl RecordingExecutor {
        fn calls(&self) -> Vec<(Level, Vec<BackupArtifact>)> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl BackupExecutor for RecordingExecutor {
        async fn execute(&self, level: Level, artifacts: &[BackupArtifact]) -> anyhow::Result<()> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((level, artifacts.to_vec()));
            }
            if self.fail {
                anyhow::bail!("nbackup exited with status 1");
            }
            Ok(())
        }
    }

    fn at(hh: u32, mm: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(hh, mm, 0))
            .expect("valid test timestamp")
    }

    fn levels() -> anyhow::Result<LevelSet> {
        let mut set = LevelSet::new();
        set.add(Level::ROOT, Tick::parse("daily@02:00")?)?;
        set.add(Level::from(1), Tick::parse("hourly")?)?;
        Ok(set)
    }

    fn naming() -> TimestampNaming {
        TimestampNaming::new("/backups", "base")
    }

    fn validator(ledger: MemoryLedger) -> ChainValidator {
        ChainValidator::new(Arc::new(ledger), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_runs_selected_level_with_derived_artifacts() -> anyhow::Result<()> {
        let levels = levels()?;
        let validator = validator(MemoryLedger::new());
        let naming = naming();
        let executor = RecordingExecutor::default();
        let orchestrator = Orchestrator::new(&levels, &validator, &naming, &executor);

        let report = orchestrator.invoke(&at(2, 0)).await;
        assert_eq!(report.reason, Reason::Ran);
        assert!(report.executed);
        assert_eq!(report.level, Some(Level::from(1)));

        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, Level::from(1));
        assert_eq!(calls[0].1, naming.artifacts(Level::from(1), &at(2, 0)));
        Ok(())
    }

    #[tokio::test]
    async fn test_idle_tick_touches_nothing() -> anyhow::Result<()> {
        let levels = levels()?;
        let ledger = Arc::new(MemoryLedger::new());
        let validator = ChainValidator::new(ledger.clone(), Duration::from_millis(50));
        let naming = naming();
        let executor = RecordingExecutor::default();
        let orchestrator = Orchestrator::new(&levels, &validator, &naming, &executor);

        let report = orchestrator.invoke(&at(2, 30)).await;
        assert_eq!(report.reason, Reason::SkippedNoMatch);
        assert!(report.is_success());
        assert!(ledger.lookups().is_empty());
        assert!(executor.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_chain_aborts_before_executor() -> anyhow::Result<()> {
        let levels = levels()?;
        let naming = naming();
        let existing = naming.artifacts(Level::from(1), &at(5, 0))[0].file_path();
        let validator = validator(MemoryLedger::new().with_entry(&existing, 1));
        let executor = RecordingExecutor::default();
        let orchestrator = Orchestrator::new(&levels, &validator, &naming, &executor);

        let err = orchestrator.run(&at(5, 0)).await.unwrap_err();
        match &err {
            OrchestratorError::Chain(ChainError::DuplicateChain { level, files }) => {
                assert_eq!(*level, Level::from(1));
                assert_eq!(files, &vec![existing.clone()]);
            }
            other => panic!("expected duplicate chain, got {:?}", other),
        }
        assert!(err.to_string().contains(&existing));

        let report = orchestrator.invoke(&at(5, 0)).await;
        assert_eq!(report.reason, Reason::SkippedDuplicateChain);
        assert_eq!(report.level, Some(Level::from(1)));
        assert!(!report.is_success());
        assert!(executor.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_ledger_failure_is_fatal_not_safe() -> anyhow::Result<()> {
        let levels = levels()?;
        let naming = naming();
        let candidate = naming.artifacts(Level::from(1), &at(7, 0))[0].file_path();
        let validator = validator(MemoryLedger::new().stalling_on(&candidate));
        let executor = RecordingExecutor::default();
        let orchestrator = Orchestrator::new(&levels, &validator, &naming, &executor);

        let err = orchestrator.run(&at(7, 0)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Ledger(LedgerQueryError::Timeout { .. })));

        let report = orchestrator.invoke(&at(7, 0)).await;
        assert_eq!(report.reason, Reason::Error);
        assert!(!report.executed);
        assert!(executor.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_root_is_error() {
        let levels = LevelSet::new();
        let validator = validator(MemoryLedger::new());
        let naming = naming();
        let executor = RecordingExecutor::default();
        let orchestrator = Orchestrator::new(&levels, &validator, &naming, &executor);

        let report = orchestrator.invoke(&at(2, 0)).await;
        assert_eq!(report.reason, Reason::Error);
        assert_eq!(report.level, None);
        assert!(report.message.unwrap_or_default().contains("Level 0 missing"));
    }

    #[tokio::test]
    async fn test_executor_error_is_passed_through() -> anyhow::Result<()> {
        let levels = levels()?;
        let validator = validator(MemoryLedger::new());
        let naming = naming();
        let executor = RecordingExecutor {
            fail: true,
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(&levels, &validator, &naming, &executor);

        let err = orchestrator.run(&at(2, 0)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Executor(_)));
        assert!(err.to_string().contains("nbackup exited with status 1"));
        assert_eq!(executor.calls().len(), 1);
        Ok(())
    }

    #[test]
    fn test_report_serializes_kebab_case_reason() -> anyhow::Result<()> {
        let report = InvocationReport {
            executed: false,
            level: Some(Level::ROOT),
            reason: Reason::SkippedDuplicateChain,
            message: None,
        };
        assert_eq!(
            serde_json::to_value(&report)?,
            serde_json::json!({"executed": false, "level": 0, "reason": "skipped-duplicate-chain"})
        );
        Ok(())
    }

    #[test]
    fn test_failed_report_without_level() -> anyhow::Result<()> {
        let report = InvocationReport::failed(None, "Failed to connect to backup ledger: refused");
        assert!(!report.is_success());
        assert_eq!(
            serde_json::to_value(&report)?,
            serde_json::json!({
                "executed": false,
                "level": null,
                "reason": "error",
                "message": "Failed to connect to backup ledger: refused"
            })
        );
        Ok(())
    }
}
