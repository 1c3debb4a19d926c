use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::compactor;
use crate::ledger::Ledger;
use crate::limits::*;
use crate::observability::TENANTS_ACTIVE;

/// Manages per-hotel ledgers. Each hotel gets its own Ledger + WAL +
/// compactor. Hotel = database name from the pgwire connection.
pub struct TenantManager {
    ledgers: DashMap<String, Arc<Ledger>>,
    /// Serialises first opens so two connections cannot replay the same WAL.
    opening: Mutex<()>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            ledgers: DashMap::new(),
            opening: Mutex::new(()),
            data_dir,
            compact_threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.ledgers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledgers.is_empty()
    }

    /// Get or lazily open the ledger for the given hotel.
    pub async fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Ledger>> {
        if let Some(ledger) = self.ledgers.get(tenant) {
            return Ok(ledger.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "tenant name too long"));
        }
        let safe_name = sanitize(tenant)?;

        let _opening = self.opening.lock().await;
        if let Some(ledger) = self.ledgers.get(tenant) {
            return Ok(ledger.value().clone());
        }
        if self.ledgers.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let ledger = Arc::new(Ledger::open(wal_path).await?);
        tokio::spawn(compactor::run_compactor(
            Arc::downgrade(&ledger),
            self.compact_threshold,
        ));

        self.ledgers.insert(tenant.to_string(), ledger.clone());
        metrics::gauge!(TENANTS_ACTIVE).set(self.ledgers.len() as f64);
        tracing::info!("opened hotel {safe_name}");
        Ok(ledger)
    }
}

/// Keep only characters that are safe in a file name.
fn sanitize(tenant: &str) -> io::Result<String> {
    let safe: String = tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty tenant name"));
    }
    Ok(safe)
}
