// In-memory ledger used by the validator and orchestrator tests.
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::ledger::Ledger;

#[derive(Default)]
pub struct MemoryLedger {
    counts: HashMap<String, i64>,
    failing: HashSet<String>,
    stalled: HashSet<String>,
    pub lookups: Mutex<Vec<String>>,
    pub closed: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, file: &str, count: i64) -> Self {
        self.counts.insert(file.to_string(), count);
        self
    }

    pub fn failing_on(mut self, file: &str) -> Self {
        self.failing.insert(file.to_string());
        self
    }

    pub fn stalling_on(mut self, file: &str) -> Self {
        self.stalled.insert(file.to_string());
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn count_entries(&self, file_name: &str) -> Result<i64> {
        if let Ok(mut lookups) = self.lookups.lock() {
            lookups.push(file_name.to_string());
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(anyhow!("ledger closed"));
        }
        if self.stalled.contains(file_name) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.failing.contains(file_name) {
            return Err(anyhow!("statement failed for {}", file_name));
        }
        Ok(self.counts.get(file_name).copied().unwrap_or(0))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
