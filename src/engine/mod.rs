mod availability;
mod error;
mod mutations;
mod queries;
mod recurrence;
mod retry;
mod store;
mod validation;

pub use availability::{blocked_times, resolve_day, resolve_range};
pub use error::EngineError;
pub use recurrence::{expand, ordinal_range};
pub use store::{BlockState, RangeView};
pub(crate) use validation::validate_new_block_date;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::booking::BookingStore;
use crate::catalog::SlotCatalog;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

use retry::retry_io;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    /// One caller's events; they commit or roll back together.
    Append {
        events: Vec<BlockEvent>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<BlockEvent>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch; roll the file back if it fails.
/// 5. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { events, response } => {
                let mut batch = vec![(events, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { events, response }) => {
                            batch.push((events, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                let entries: usize = batch.iter().map(|(events, _)| events.len()).sum();
                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(entries as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

type AppendBatch = Vec<(Vec<BlockEvent>, oneshot::Sender<io::Result<()>>)>;

fn flush_batch(wal: &mut Wal, batch: &AppendBatch) -> io::Result<()> {
    let result = batch
        .iter()
        .flat_map(|(events, _)| events)
        .try_for_each(|event| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        tracing::error!("WAL batch of {} failed: {e}; rolling back", batch.len());
        if let Err(rb) = wal.rollback() {
            tracing::error!("WAL rollback failed: {rb}");
        }
    }
    result
}

fn respond_batch(batch: AppendBatch, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Availability engine for one business: block store, resolver and the
/// collaborators they read from.
pub struct Engine {
    pub(super) state: RwLock<BlockState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub catalog: Arc<SlotCatalog>,
    pub(super) bookings: Arc<dyn BookingStore>,
    pub notify: Arc<NotifyHub>,
    timezone: Tz,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        catalog: Arc<SlotCatalog>,
        bookings: Arc<dyn BookingStore>,
        notify: Arc<NotifyHub>,
    ) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut state = BlockState::new();
        for event in &events {
            state.apply(event);
        }
        tracing::debug!("replayed {} events from {}", events.len(), wal_path.display());

        Ok(Self {
            state: RwLock::new(state),
            wal_tx,
            catalog,
            bookings,
            notify,
            timezone: Tz::UTC,
        })
    }

    /// Business timezone used to decide what "today" is.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn today(&self) -> CalendarDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    async fn wal_send(&self, events: &[BlockEvent]) -> io::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                events: events.to_vec(),
                response: tx,
            })
            .await
            .map_err(|_| io::Error::other("WAL writer shut down"))?;
        rx.await
            .map_err(|_| io::Error::other("WAL writer dropped response"))?
    }

    /// Durably append via the group-commit writer, retrying transient failures.
    async fn wal_append(&self, events: &[BlockEvent]) -> Result<(), EngineError> {
        retry_io("wal", || self.wal_send(events))
            .await
            .map_err(|e| EngineError::StoreUnavailable(e.to_string()))
    }

    /// WAL-append + apply + notify in one call. Caller holds the write lock.
    pub(super) async fn persist_and_apply(
        &self,
        state: &mut BlockState,
        event: BlockEvent,
    ) -> Result<(), EngineError> {
        self.persist_and_apply_all(state, vec![event]).await
    }

    /// Log `events` as one WAL write, then apply them. Nothing is applied if
    /// the write fails.
    pub(super) async fn persist_and_apply_all(
        &self,
        state: &mut BlockState,
        events: Vec<BlockEvent>,
    ) -> Result<(), EngineError> {
        if events.is_empty() {
            return Ok(());
        }
        self.wal_append(&events).await?;
        for event in &events {
            state.apply(event);
            self.notify.send(event);
        }
        Ok(())
    }
}
