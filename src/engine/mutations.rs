use chrono::Days;
use tokio::sync::oneshot;

use crate::limits::*;
use crate::model::*;

use super::recurrence::ordinal_range;
use super::validation::{validate_reason, validate_recurring_window, validate_slot_label};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn add_full_day_block(
        &self,
        date: CalendarDate,
        reason: Option<String>,
    ) -> Result<MutationOutcome, EngineError> {
        validate_reason(&reason)?;
        let mut guard = self.state.write().await;
        if guard.has_full_day(date) {
            return Ok(MutationOutcome::Unchanged);
        }
        self.persist_and_apply(&mut guard, BlockEvent::FullDayBlocked { date, reason })
            .await?;
        Ok(MutationOutcome::Applied)
    }

    pub async fn remove_full_day_block(&self, date: CalendarDate) -> Result<MutationOutcome, EngineError> {
        let mut guard = self.state.write().await;
        if !guard.has_full_day(date) {
            return Ok(MutationOutcome::NotFound);
        }
        self.persist_and_apply(&mut guard, BlockEvent::FullDayUnblocked { date })
            .await?;
        Ok(MutationOutcome::Applied)
    }

    pub async fn add_slot_block(
        &self,
        date: CalendarDate,
        slot_label: &str,
        reason: Option<String>,
    ) -> Result<MutationOutcome, EngineError> {
        validate_slot_label(&self.catalog, date, slot_label)?;
        validate_reason(&reason)?;
        let mut guard = self.state.write().await;
        if guard.has_slot_block(date, slot_label) {
            return Ok(MutationOutcome::Unchanged);
        }
        let event = BlockEvent::SlotBlocked {
            date,
            slot_label: slot_label.to_string(),
            reason,
        };
        self.persist_and_apply(&mut guard, event).await?;
        Ok(MutationOutcome::Applied)
    }

    /// Removes a stored block even if its label has since left the catalog.
    pub async fn remove_slot_block(
        &self,
        date: CalendarDate,
        slot_label: &str,
    ) -> Result<MutationOutcome, EngineError> {
        let mut guard = self.state.write().await;
        if !guard.has_slot_block(date, slot_label) {
            return Ok(MutationOutcome::NotFound);
        }
        let event = BlockEvent::SlotUnblocked {
            date,
            slot_label: slot_label.to_string(),
        };
        self.persist_and_apply(&mut guard, event).await?;
        Ok(MutationOutcome::Applied)
    }

    /// Add a weekly block effective from today through `effective_until`.
    /// Re-adding an existing id is a no-op.
    pub async fn add_recurring_block(
        &self,
        id: RecurringBlockId,
        day_of_week: u8,
        start_slot_label: &str,
        end_slot_label: &str,
        effective_until: CalendarDate,
        reason: Option<String>,
    ) -> Result<MutationOutcome, EngineError> {
        ordinal_range(&self.catalog, day_of_week, start_slot_label, end_slot_label)?;
        validate_reason(&reason)?;
        let effective_from = self.today();
        validate_recurring_window(effective_from, effective_until)?;

        let mut guard = self.state.write().await;
        if guard.recurring(&id).is_some() {
            return Ok(MutationOutcome::Unchanged);
        }
        if guard.recurring_count() >= MAX_RECURRING_BLOCKS {
            return Err(EngineError::LimitExceeded("too many recurring blocks"));
        }
        let block = RecurringBlock {
            id,
            day_of_week,
            start_slot_label: start_slot_label.to_string(),
            end_slot_label: end_slot_label.to_string(),
            effective_from,
            effective_until,
            reason,
        };
        self.persist_and_apply(&mut guard, BlockEvent::RecurringBlockAdded { block })
            .await?;
        Ok(MutationOutcome::Applied)
    }

    pub async fn remove_recurring_block(&self, id: RecurringBlockId) -> Result<MutationOutcome, EngineError> {
        let mut guard = self.state.write().await;
        if guard.recurring(&id).is_none() {
            return Ok(MutationOutcome::NotFound);
        }
        self.persist_and_apply(&mut guard, BlockEvent::RecurringBlockRemoved { id })
            .await?;
        Ok(MutationOutcome::Applied)
    }

    /// Drop one-off blocks and recurring blocks that ended more than
    /// `retention_days` ago. Returns how many entries were removed.
    pub async fn purge_expired(&self, retention_days: u64) -> Result<usize, EngineError> {
        let horizon = self
            .today()
            .checked_sub_days(Days::new(retention_days))
            .unwrap_or(CalendarDate::MIN);
        let mut guard = self.state.write().await;
        let events = guard.retention_events(horizon);
        let count = events.len();
        // One WAL write for the whole sweep.
        self.persist_and_apply_all(&mut guard, events).await?;
        Ok(count)
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Mutations wait on the write lock until the compacted file is swapped in.
        let guard = self.state.read().await;
        let events = guard.to_events();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StoreUnavailable("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::StoreUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StoreUnavailable(e.to_string()));
        drop(guard);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
