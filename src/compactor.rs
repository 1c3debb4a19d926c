use std::sync::Weak;
use std::time::Duration;

use tracing::{info, warn};

use crate::ledger::Ledger;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a hotel's WAL once enough appends have
/// piled up since the last rewrite. Exits when the ledger is dropped.
pub async fn run_compactor(ledger: Weak<Ledger>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(ledger) = ledger.upgrade() else { return };
        compact_if_due(&ledger, threshold).await;
    }
}

/// Returns whether a compaction ran and succeeded.
pub async fn compact_if_due(ledger: &Ledger, threshold: u64) -> bool {
    let appends = ledger.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match ledger.compact().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let ledger = Ledger::open(test_wal_path("threshold.wal")).await.unwrap();
        for id in 1..=3 {
            ledger
                .create_room(Room { id, kind: RoomKind::Single, price: 40 })
                .await
                .unwrap();
        }

        assert!(!compact_if_due(&ledger, 10).await);
        assert!(compact_if_due(&ledger, 3).await);
        assert_eq!(ledger.appends_since_compact().await, 0);
        assert_eq!(ledger.list_rooms().await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_ledger_dropped() {
        let ledger = Arc::new(Ledger::open(test_wal_path("dropped.wal")).await.unwrap());
        let weak = Arc::downgrade(&ledger);
        drop(ledger);
        let task = tokio::spawn(run_compactor(weak, 1));
        tokio::time::timeout(CHECK_INTERVAL * 3, task)
            .await
            .expect("compactor should exit")
            .unwrap();
    }
}
