use std::time::Duration;
use thiserror::Error;

use crate::schedule::Level;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid tick expression {input:?}: {reason}")]
pub struct TickParseError {
    pub input: String,
    pub reason: String,
}

impl TickParseError {
    pub(crate) fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Startup-time failures. The process must not run with any of these.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Parse(#[from] TickParseError),

    #[error("Level must be a non-negative 32-bit integer, got {0}")]
    NegativeLevel(i64),

    #[error("Level {0} is already scheduled")]
    DuplicateLevel(Level),

    #[error("Level 0 missing: no enabled base level in the schedule")]
    MissingRootLevel,

    #[error("Invalid configuration:\n  - {}", .issues.join("\n  - "))]
    Invalid { issues: Vec<String> },

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration JSON: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectError {
    #[error("Level 0 missing: no enabled base level in the schedule")]
    MissingRootLevel,

    #[error("No level scheduled at this tick")]
    NoScheduledLevel,
}

#[derive(Error, Debug)]
pub enum LedgerQueryError {
    #[error("Failed to connect to backup ledger: {0:#}")]
    Connect(anyhow::Error),

    #[error("Ledger lookup for {file} failed: {source}")]
    Query {
        file: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Ledger lookup for {file} timed out after {}ms", .after.as_millis())]
    Timeout { file: String, after: Duration },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Duplicate entry for {} already recorded (level {level})", .files.join(", "))]
    DuplicateChain { level: Level, files: Vec<String> },
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Select(#[from] SelectError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Ledger(#[from] LedgerQueryError),

    #[error("Backup executor failed: {0:#}")]
    Executor(anyhow::Error),
}
