// levelbak/src/config/mod.rs
use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backup::executor::find_backup_tool;
use crate::chain::firebird::{self, FirebirdTarget};
use crate::chain::ledger::{is_plain_identifier, redact_url};
use crate::errors::ConfigError;
use crate::schedule::{Level, LevelSet, Tick};

const CONFIG_FILE_NAME: &str = "config.json";
const DEFAULT_SQL_LEDGER_TABLE: &str = "backup_history";
const DEFAULT_SQL_LEDGER_COLUMN: &str = "file_name";
const DEFAULT_DATABASE_HOST: &str = "127.0.0.1";
const DEFAULT_DATABASE_PORT: u16 = 3050;
const DEFAULT_QUERY_TIMEOUT_MS: u64 = 10_000;

// Structs for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
pub struct JsonLevel {
    pub level: Option<i64>,
    pub tick: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub backup_tool: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub database: Option<String>,
    pub database_host: Option<String>,
    pub database_port: Option<u16>,
    pub database_path: Option<String>,
    pub base_name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub direct_io: Option<bool>,
    pub ledger_url: Option<String>,
    pub ledger_table: Option<String>,
    pub ledger_column: Option<String>,
    pub query_timeout_ms: Option<u64>,
    pub levels: Option<Vec<JsonLevel>>,
}

/// Where chain lookups are answered.
#[derive(Debug, Clone)]
pub enum LedgerBackend {
    /// The backed-up database's own `rdb$backup_history`, with the backup credentials.
    Firebird(FirebirdTarget),
    /// A separate PostgreSQL table kept by an external job.
    Postgres { url: String },
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    pub table: String,
    pub column: String,
    pub query_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub source: Option<PathBuf>,
    pub backup_tool: PathBuf,
    pub backup_dir: PathBuf,
    pub database: String,
    pub base_name: String,
    pub user: String,
    pub password: String,
    pub direct_io: Option<bool>,
    pub ledger: LedgerConfig,
    pub levels: LevelSet,
}

/// `config.json` in the working directory, else next to the executable.
pub fn default_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
        .unwrap_or(local)
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self, ConfigError> {
        let config_content = fs::read_to_string(config_path)?;
        let raw: RawJsonConfig = serde_json::from_str(&config_content)?;
        let mut config = Self::from_raw(raw, |key| env::var(key).ok())?;
        config.source = Some(config_path.to_path_buf());
        Ok(config)
    }

    /// Validates every field in one pass and reports all problems together.
    /// `lookup_env` supplies `ISC_USER` / `ISC_PASSWORD` fallbacks.
    pub fn from_raw(
        raw: RawJsonConfig,
        lookup_env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut issues = Vec::new();

        let backup_tool = required(raw.backup_tool, "backup_tool", &mut issues).and_then(|tool| {
            find_backup_tool(&tool)
                .map_err(|e| issues.push(format!("{:#}", e)))
                .ok()
        });
        let backup_dir = required(raw.backup_dir, "backup_dir", &mut issues);
        if let Some(dir) = &backup_dir {
            if !dir.is_dir() {
                issues.push(format!("backup_dir {} does not exist or is not a directory", dir.display()));
            }
        }
        let database = required_text(raw.database, "database", &mut issues);
        let base_name = required_text(raw.base_name, "base_name", &mut issues);
        if let Some(name) = &base_name {
            if name.contains(['/', '\\']) {
                issues.push(format!("base_name {:?} must not contain path separators", name));
            }
        }
        let user = required_text(raw.user.or_else(|| lookup_env("ISC_USER")), "user (or ISC_USER)", &mut issues);
        let password = required_text(
            raw.password.or_else(|| lookup_env("ISC_PASSWORD")),
            "password (or ISC_PASSWORD)",
            &mut issues,
        );
        let ledger_url = match raw.ledger_url {
            Some(url) => required_text(Some(url), "ledger_url", &mut issues),
            None => None,
        };
        let (default_table, default_column) = if ledger_url.is_some() {
            (DEFAULT_SQL_LEDGER_TABLE, DEFAULT_SQL_LEDGER_COLUMN)
        } else {
            (firebird::DEFAULT_TABLE, firebird::DEFAULT_COLUMN)
        };
        let table = raw.ledger_table.unwrap_or_else(|| default_table.to_string());
        let column = raw.ledger_column.unwrap_or_else(|| default_column.to_string());
        for (field, value) in [("ledger_table", &table), ("ledger_column", &column)] {
            if !is_plain_identifier(value) {
                issues.push(format!("{} {:?} is not a plain SQL identifier", field, value));
            }
        }

        let query_timeout_ms = raw.query_timeout_ms.unwrap_or(DEFAULT_QUERY_TIMEOUT_MS);
        if query_timeout_ms == 0 {
            issues.push("query_timeout_ms must be positive".to_string());
        }

        let levels = build_levels(raw.levels.unwrap_or_default(), &mut issues);

        if !issues.is_empty() {
            return Err(ConfigError::Invalid { issues });
        }

        // Every `None` above pushed an issue, so these are all present.
        match (backup_tool, backup_dir, database, base_name, user, password) {
            (Some(backup_tool), Some(backup_dir), Some(database), Some(base_name), Some(user), Some(password)) => {
                let backend = match ledger_url {
                    Some(url) => LedgerBackend::Postgres { url },
                    None => LedgerBackend::Firebird(FirebirdTarget {
                        host: raw
                            .database_host
                            .unwrap_or_else(|| DEFAULT_DATABASE_HOST.to_string()),
                        port: raw.database_port.unwrap_or(DEFAULT_DATABASE_PORT),
                        database_path: raw.database_path.unwrap_or_else(|| database.clone()),
                        user: user.clone(),
                        password: password.clone(),
                    }),
                };
                Ok(AppConfig {
                    source: None,
                    backup_tool,
                    backup_dir,
                    database,
                    base_name,
                    user,
                    password,
                    direct_io: raw.direct_io,
                    ledger: LedgerConfig {
                        backend,
                        table,
                        column,
                        query_timeout: Duration::from_millis(query_timeout_ms),
                    },
                    levels,
                })
            }
            _ => Err(ConfigError::Invalid {
                issues: vec!["required fields missing".to_string()],
            }),
        }
    }
}

fn required<T>(value: Option<T>, field: &str, issues: &mut Vec<String>) -> Option<T> {
    if value.is_none() {
        issues.push(format!("{} must be set in config.json", field));
    }
    value
}

fn required_text(value: Option<String>, field: &str, issues: &mut Vec<String>) -> Option<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Some(v),
        Some(_) => {
            issues.push(format!("{} cannot be empty", field));
            None
        }
        None => required(None, field, issues),
    }
}

fn build_levels(entries: Vec<JsonLevel>, issues: &mut Vec<String>) -> LevelSet {
    let mut levels = LevelSet::new();
    if entries.is_empty() {
        issues.push("levels must list at least one level".to_string());
        return levels;
    }

    for (index, entry) in entries.into_iter().enumerate() {
        let level = match entry.level.map(Level::new) {
            Some(Ok(level)) => Some(level),
            Some(Err(err)) => {
                issues.push(format!("levels[{}]: {}", index, err));
                None
            }
            None => {
                issues.push(format!("levels[{}]: level must be set", index));
                None
            }
        };
        let tick = match entry.tick.as_deref().map(Tick::parse) {
            Some(Ok(tick)) => Some(tick),
            Some(Err(err)) => {
                issues.push(format!("levels[{}]: {}", index, err));
                None
            }
            None => {
                issues.push(format!("levels[{}]: tick must be set", index));
                None
            }
        };

        if let (Some(level), Some(tick)) = (level, tick) {
            match levels.add(level, tick) {
                Ok(rule) => {
                    rule.set_enabled(entry.enabled.unwrap_or(true));
                }
                Err(err) => issues.push(format!("levels[{}]: {}", index, err)),
            }
        }
    }

    if let Err(err) = levels.ensure_root() {
        issues.push(err.to_string());
    }
    levels
}

impl fmt::Display for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            writeln!(f, "Config: {}", source.display())?;
        }
        writeln!(f, "Database: {:?}, base name {:?}", self.database, self.base_name)?;
        writeln!(f, "Backup tool: {}", self.backup_tool.display())?;
        writeln!(f, "Backup folder: {}", self.backup_dir.display())?;
        let ledger = match &self.ledger.backend {
            LedgerBackend::Firebird(target) => {
                format!("firebird {}:{}/{}", target.host, target.port, target.database_path)
            }
            LedgerBackend::Postgres { url } => redact_url(url),
        };
        writeln!(
            f,
            "Ledger: {} ({}.{}, timeout {}ms)",
            ledger,
            self.ledger.table,
            self.ledger.column,
            self.ledger.query_timeout.as_millis()
        )?;
        write!(f, "Schedule backup:{}", self.levels.schedule())
    }
}
