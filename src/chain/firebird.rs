// levelbak/src/chain/firebird.rs
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use rsfbclient::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task;

use super::ledger::{Ledger, is_plain_identifier};
use crate::errors::LedgerQueryError;

pub const DEFAULT_TABLE: &str = "rdb$backup_history";
pub const DEFAULT_COLUMN: &str = "rdb$file_name";

/// Runs one `(query, file_name)` lookup on an open session.
pub(crate) type Session = Box<dyn FnMut(&str, &str) -> Result<i64> + Send>;

/// Where the Firebird server keeps the database the backup tool works on.
#[derive(Debug, Clone)]
pub struct FirebirdTarget {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub user: String,
    pub password: String,
}

/// Ledger read straight from Firebird's own `rdb$backup_history`, which nbackup
/// appends to after every successful run.
///
/// The wire client is blocking, so each lookup runs on the blocking pool.
pub struct FirebirdLedger {
    session: Arc<Mutex<Option<Session>>>,
    query: String,
}

impl FirebirdLedger {
    pub async fn connect(
        target: &FirebirdTarget,
        table: &str,
        column: &str,
        connect_timeout: Duration,
    ) -> Result<Self, LedgerQueryError> {
        let query = lookup_query(table, column).map_err(LedgerQueryError::Connect)?;

        tracing::debug!(
            host = %target.host,
            port = target.port,
            database = %target.database_path,
            table,
            column,
            "Connecting to Firebird backup ledger"
        );
        let target = target.clone();
        let opening = task::spawn_blocking(move || open_session(&target));
        let session = match tokio::time::timeout(connect_timeout, opening).await {
            Ok(Ok(Ok(session))) => session,
            Ok(Ok(Err(e))) => return Err(LedgerQueryError::Connect(e)),
            Ok(Err(join)) => {
                return Err(LedgerQueryError::Connect(
                    anyhow::Error::new(join).context("Firebird connect task failed"),
                ));
            }
            Err(_) => {
                return Err(LedgerQueryError::Connect(anyhow!(
                    "no answer from Firebird within {}ms",
                    connect_timeout.as_millis()
                )));
            }
        };

        Ok(Self::from_session(session, query))
    }

    pub(crate) fn from_session(session: Session, query: String) -> Self {
        Self {
            session: Arc::new(Mutex::new(Some(session))),
            query,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

fn open_session(target: &FirebirdTarget) -> Result<Session> {
    let mut conn = rsfbclient::builder_pure_rust()
        .host(target.host.as_str())
        .port(target.port)
        .db_name(target.database_path.as_str())
        .user(target.user.as_str())
        .pass(target.password.as_str())
        .connect()
        .with_context(|| format!("Failed to attach to {}:{}", target.host, target.database_path))?;

    Ok(Box::new(move |query: &str, file_name: &str| {
        let row: Option<(i64,)> = conn.query_first(query, (file_name.to_string(),))?;
        Ok(row.map(|(count,)| count).unwrap_or(0))
    }))
}

/// `SELECT COUNT(*) FROM <table> WHERE <column> = ?`
pub fn lookup_query(table: &str, column: &str) -> Result<String> {
    for name in [table, column] {
        if !is_plain_identifier(name) {
            anyhow::bail!("invalid ledger identifier {:?}", name);
        }
    }
    Ok(format!("SELECT COUNT(*) FROM {} WHERE {} = ?", table, column))
}

#[async_trait]
impl Ledger for FirebirdLedger {
    async fn count_entries(&self, file_name: &str) -> Result<i64> {
        let session = Arc::clone(&self.session);
        let query = self.query.clone();
        let file = file_name.to_string();

        task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| anyhow!("Firebird ledger session lock poisoned"))?;
            let lookup = guard
                .as_mut()
                .ok_or_else(|| anyhow!("Firebird ledger session is closed"))?;
            lookup(&query, &file)
        })
        .await
        .context("Firebird lookup task failed")?
        .with_context(|| format!("Failed to count ledger rows for {}", file_name))
    }

    async fn close(&self) {
        let session = Arc::clone(&self.session);
        // Dropping the connection detaches from the server, which may block.
        let closed = task::spawn_blocking(move || {
            if let Ok(mut guard) = session.lock() {
                guard.take();
            }
        })
        .await;
        if let Err(e) = closed {
            tracing::warn!(error = %e, "Firebird ledger did not close cleanly");
        } else {
            tracing::debug!("Firebird ledger connection closed");
        }
    }
}
