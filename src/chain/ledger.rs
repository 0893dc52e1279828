// levelbak/src/chain/ledger.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;
use url::Url;

use crate::errors::LedgerQueryError;

/// Read-only view of the database's record of completed backups.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Number of recorded backups whose file name equals `file_name`.
    async fn count_entries(&self, file_name: &str) -> Result<i64>;

    /// Releases the underlying session. Further lookups fail.
    async fn close(&self);
}

/// Ledger kept in a PostgreSQL backup-history table, one pooled connection.
pub struct SqlLedger {
    pool: PgPool,
    query: String,
}

impl SqlLedger {
    pub async fn connect(
        ledger_url: &str,
        table: &str,
        column: &str,
        acquire_timeout: Duration,
    ) -> Result<Self, LedgerQueryError> {
        for name in [table, column] {
            if !is_plain_identifier(name) {
                return Err(LedgerQueryError::Connect(anyhow::anyhow!(
                    "invalid ledger identifier {:?}",
                    name
                )));
            }
        }

        tracing::debug!(url = %redact_url(ledger_url), table, column, "Connecting to backup ledger");
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(acquire_timeout)
            .connect(ledger_url)
            .await
            .map_err(|e| LedgerQueryError::Connect(e.into()))?;

        Ok(Self {
            pool,
            query: format!("SELECT COUNT(*) FROM {} WHERE {} = $1", table, column),
        })
    }
}

#[async_trait]
impl Ledger for SqlLedger {
    async fn count_entries(&self, file_name: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&self.query)
            .bind(file_name)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to count ledger rows for {}", file_name))?;
        Ok(count)
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("Backup ledger connection closed");
    }
}

/// Table and column names are spliced into the query text, so only `[A-Za-z_][A-Za-z0-9_$.]*`
/// is accepted.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.')
}

/// Connection string with the password blanked, for logs and operator display.
pub fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable url>".to_string(),
    }
}
