use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;
use tracing::debug;

use crate::collaborators::{BackendError, BackendFuture, QuotaService};

#[derive(Default)]
struct Usage {
    quota: Option<u64>,
    used: u64,
    /// Open reservations by storage key.
    reserved: HashMap<String, u64>,
    applied: HashSet<String>,
}

impl Usage {
    fn committed(&self) -> u64 {
        self.used + self.reserved.values().sum::<u64>()
    }
}

/// In-memory quota ledger. Owners without an explicit quota get the
/// ledger's default.
pub struct MemoryQuotaLedger {
    default_quota: u64,
    owners: Mutex<HashMap<String, Usage>>,
}

impl MemoryQuotaLedger {
    pub fn new(default_quota: u64) -> Self {
        Self {
            default_quota,
            owners: Mutex::new(HashMap::new()),
        }
    }

    pub async fn set_quota(&self, owner_id: &str, bytes: u64) {
        self.owners
            .lock()
            .await
            .entry(owner_id.to_string())
            .or_default()
            .quota = Some(bytes);
    }

    pub async fn used(&self, owner_id: &str) -> u64 {
        self.owners
            .lock()
            .await
            .get(owner_id)
            .map(|u| u.used)
            .unwrap_or(0)
    }

    /// Bytes held by open reservations.
    pub async fn reserved(&self, owner_id: &str) -> u64 {
        self.owners
            .lock()
            .await
            .get(owner_id)
            .map(|u| u.reserved.values().sum())
            .unwrap_or(0)
    }

    pub async fn quota(&self, owner_id: &str) -> u64 {
        self.owners
            .lock()
            .await
            .get(owner_id)
            .and_then(|u| u.quota)
            .unwrap_or(self.default_quota)
    }
}

impl QuotaService for MemoryQuotaLedger {
    fn reserve<'a>(
        &'a self,
        owner_id: &'a str,
        bytes: u64,
        storage_key: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut owners = self.owners.lock().await;
            let usage = owners.entry(owner_id.to_string()).or_default();
            if usage.applied.contains(storage_key) || usage.reserved.contains_key(storage_key) {
                return Ok(());
            }
            let quota = usage.quota.unwrap_or(self.default_quota);
            let available = quota.saturating_sub(usage.committed());
            if bytes > available {
                return Err(BackendError::QuotaExceeded {
                    needed: bytes,
                    available,
                });
            }
            usage.reserved.insert(storage_key.to_string(), bytes);
            debug!(owner = owner_id, bytes, key = storage_key, "quota reserved");
            Ok(())
        })
    }

    fn apply_usage<'a>(
        &'a self,
        owner_id: &'a str,
        bytes: u64,
        storage_key: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut owners = self.owners.lock().await;
            let usage = owners.entry(owner_id.to_string()).or_default();
            usage.reserved.remove(storage_key);
            if usage.applied.insert(storage_key.to_string()) {
                usage.used += bytes;
                debug!(owner = owner_id, bytes, used = usage.used, "quota usage applied");
            }
            Ok(())
        })
    }

    fn release<'a>(&'a self, owner_id: &'a str, storage_key: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut owners = self.owners.lock().await;
            if let Some(bytes) = owners
                .get_mut(owner_id)
                .and_then(|u| u.reserved.remove(storage_key))
            {
                debug!(owner = owner_id, bytes, key = storage_key, "quota reservation released");
            }
            Ok(())
        })
    }
}
