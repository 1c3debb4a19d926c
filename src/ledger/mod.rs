//! One hotel's bookings: the in-memory store, its write-ahead log, and the
//! per-room gates that make check-then-insert atomic.

mod error;
mod mutations;
mod queries;

pub use error::LedgerError;
pub use mutations::NewReservation;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard};

use crate::model::*;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::store::MemoryStore;
use crate::wal::Wal;

type Reply<T> = oneshot::Sender<io::Result<T>>;

pub(super) enum WalCommand {
    /// Events logged and acknowledged together: all durable or none.
    Append { events: Vec<Event>, reply: Reply<()> },
    Compact { events: Vec<Event>, reply: Reply<()> },
    AppendsSinceCompact { reply: oneshot::Sender<u64> },
}

/// Owns the WAL. Appends that queue up while a flush is in progress are
/// written together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut pending: Vec<(Vec<Event>, Reply<()>)> = Vec::new();
    while let Some(cmd) = rx.recv().await {
        let mut next = Some(cmd);
        while let Some(cmd) = next.take() {
            match cmd {
                WalCommand::Append { events, reply } => {
                    pending.push((events, reply));
                    next = rx.try_recv().ok();
                }
                other => {
                    commit(&mut wal, &mut pending);
                    run_maintenance(&mut wal, other);
                }
            }
        }
        commit(&mut wal, &mut pending);
    }
}

fn commit(wal: &mut Wal, pending: &mut Vec<(Vec<Event>, Reply<()>)>) {
    if pending.is_empty() {
        return;
    }
    let records: usize = pending.iter().map(|(events, _)| events.len()).sum();
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(records as f64);
    let started = Instant::now();

    let appended = pending
        .iter()
        .flat_map(|(events, _)| events)
        .try_for_each(|event| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes do not leak
    // into the next group.
    let flushed = wal.flush_sync();
    let outcome = appended.and(flushed);

    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    for (_, reply) in pending.drain(..) {
        let r = match &outcome {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = reply.send(r);
    }
}

fn run_maintenance(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, reply } => {
            let result = Wal::stage_snapshot(wal.path(), &events).and_then(|()| wal.install_snapshot());
            let _ = reply.send(result);
        }
        WalCommand::AppendsSinceCompact { reply } => {
            let _ = reply.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

pub struct Ledger {
    pub(super) store: MemoryStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Held across conflict check and insert, one per room.
    gates: DashMap<RoomId, Arc<Mutex<()>>>,
    /// Serialises room creation so two creators cannot both pass the
    /// existence check.
    pub(super) catalog_gate: Mutex<()>,
}

impl Ledger {
    /// Replay the log at `wal_path` and start its writer task.
    pub async fn open(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = MemoryStore::new();
        for event in &events {
            store.apply(event).await;
        }
        tracing::debug!(
            events = events.len(),
            rooms = store.room_count(),
            "replayed {}",
            wal_path.display()
        );

        Ok(Self {
            store,
            wal_tx,
            gates: DashMap::new(),
            catalog_gate: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    async fn wal_request<T>(
        &self,
        cmd: WalCommand,
        rx: oneshot::Receiver<io::Result<T>>,
    ) -> Result<T, LedgerError> {
        self.wal_tx
            .send(cmd)
            .await
            .map_err(|_| LedgerError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| LedgerError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| LedgerError::WalError(e.to_string()))
    }

    pub(super) async fn wal_append(&self, events: Vec<Event>) -> Result<(), LedgerError> {
        let (reply, rx) = oneshot::channel();
        self.wal_request(WalCommand::Append { events, reply }, rx).await
    }

    /// Log an event, then fold it into the store.
    pub(super) async fn persist(&self, event: Event) -> Result<(), LedgerError> {
        self.persist_all(vec![event]).await
    }

    /// Log `events` as one group and fold them into the store only once the
    /// whole group is durable.
    pub(super) async fn persist_all(&self, events: Vec<Event>) -> Result<(), LedgerError> {
        self.wal_append(events.clone()).await?;
        for event in &events {
            self.store.apply(event).await;
        }
        Ok(())
    }

    /// Lock the gates of `rooms` in ascending order.
    pub(super) async fn lock_rooms(&self, rooms: &[RoomId]) -> Vec<OwnedMutexGuard<()>> {
        let mut sorted = rooms.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for room in sorted {
            let gate = self
                .gates
                .entry(room)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            guards.push(gate.lock_owned().await);
        }
        guards
    }

    /// Rewrite the WAL as the minimal event list for the current state.
    pub async fn compact(&self) -> Result<(), LedgerError> {
        let _catalog = self.catalog_gate.lock().await;
        let rooms = self.store.room_ids();
        let _gates = self.lock_rooms(&rooms).await;
        let events = self.store.snapshot_events().await;
        let (reply, rx) = oneshot::channel();
        self.wal_request(WalCommand::Compact { events, reply }, rx).await
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (reply, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { reply })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
