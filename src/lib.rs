//! Leveled incremental backup scheduling.
//!
//! A [`schedule::LevelSet`] decides which backup level is due at a given minute,
//! a [`chain::ChainValidator`] checks the database's backup-history ledger so the
//! same chain link is never started twice, and [`backup::Orchestrator`] ties the
//! two together in front of the external backup tool.

pub mod backup;
pub mod chain;
pub mod config;
pub mod errors;
pub mod schedule;

pub use backup::{InvocationReport, Orchestrator, Reason};
pub use chain::ChainValidator;
pub use errors::{ChainError, ConfigError, LedgerQueryError, OrchestratorError, SelectError, TickParseError};
pub use schedule::{Level, LevelRule, LevelSet, Tick};
