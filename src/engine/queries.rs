use std::collections::{BTreeMap, BTreeSet};

use crate::model::*;

use super::availability::{blocked_times, resolve_range};
use super::retry::retry_io;
use super::validation::validate_query_range;
use super::{Engine, EngineError};

impl Engine {
    /// Availability for every date in `range`, ascending.
    ///
    /// One state read per block kind under a single read lock, then one
    /// batched occupancy read outside the lock. Nothing is cached.
    pub async fn resolve(&self, range: DateRange) -> Result<Vec<AvailabilitySnapshot>, EngineError> {
        validate_query_range(&range)?;
        let started = std::time::Instant::now();

        let view = self.state.read().await.view(range);
        let occupied = retry_io("booking_store", || self.bookings.occupied_slots_in(range))
            .await
            .map_err(|e| EngineError::BookingStore(e.to_string()))?;

        let snapshots = resolve_range(&self.catalog, range, &view, &occupied);
        metrics::histogram!(crate::observability::RESOLVE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(snapshots)
    }

    pub async fn full_day_blocks_in(&self, range: DateRange) -> BTreeSet<CalendarDate> {
        let guard = self.state.read().await;
        guard.full_days_in(range).map(|b| b.date).collect()
    }

    /// Full-day blocks with their reasons.
    pub async fn full_day_block_details(&self, range: DateRange) -> Vec<FullDayBlock> {
        let guard = self.state.read().await;
        guard.full_days_in(range).cloned().collect()
    }

    pub async fn slot_blocks_in(&self, range: DateRange) -> BTreeMap<CalendarDate, BTreeSet<String>> {
        self.state.read().await.view(range).slots
    }

    pub async fn recurring_blocks_active_on(&self, date: CalendarDate) -> Vec<RecurringBlock> {
        let guard = self.state.read().await;
        guard.recurring_active_on(date).cloned().collect()
    }

    pub async fn recurring_blocks(&self) -> Vec<RecurringBlock> {
        let guard = self.state.read().await;
        guard.recurring_blocks().cloned().collect()
    }

    /// Direct slot blocks and recurring expansions with their reasons.
    pub async fn blocked_times_in(&self, range: DateRange) -> Result<Vec<BlockedTimeInfo>, EngineError> {
        validate_query_range(&range)?;
        let (slot_blocks, recurring): (Vec<SlotBlock>, Vec<RecurringBlock>) = {
            let guard = self.state.read().await;
            (
                guard.slot_blocks_in(range).cloned().collect(),
                guard
                    .recurring_blocks()
                    .filter(|rb| rb.overlaps(&range))
                    .cloned()
                    .collect(),
            )
        };
        Ok(blocked_times(&self.catalog, range, &slot_blocks, &recurring))
    }
}
