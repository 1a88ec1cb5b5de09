use std::collections::{BTreeMap, BTreeSet};

use crate::model::*;

/// In-memory block state for one tenant. Rebuilt from the WAL on open and
/// mutated only through `apply`.
#[derive(Debug, Clone, Default)]
pub struct BlockState {
    full_days: BTreeMap<CalendarDate, FullDayBlock>,
    slots: BTreeMap<CalendarDate, BTreeMap<String, SlotBlock>>,
    recurring: BTreeMap<RecurringBlockId, RecurringBlock>,
}

/// Everything the resolver needs for one range, copied out under a single read lock.
#[derive(Debug, Clone, Default)]
pub struct RangeView {
    pub full_days: BTreeSet<CalendarDate>,
    pub slots: BTreeMap<CalendarDate, BTreeSet<String>>,
    pub recurring: Vec<RecurringBlock>,
}

impl RangeView {
    pub fn recurring_active_on(&self, date: CalendarDate) -> impl Iterator<Item = &RecurringBlock> {
        self.recurring.iter().filter(move |rb| rb.is_active_on(date))
    }
}

impl BlockState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event (no locking: caller holds the lock). Returns whether state changed.
    pub fn apply(&mut self, event: &BlockEvent) -> bool {
        match event {
            BlockEvent::FullDayBlocked { date, reason } => {
                if self.full_days.contains_key(date) {
                    return false;
                }
                self.full_days.insert(
                    *date,
                    FullDayBlock {
                        date: *date,
                        reason: reason.clone(),
                    },
                );
                true
            }
            BlockEvent::FullDayUnblocked { date } => self.full_days.remove(date).is_some(),
            BlockEvent::SlotBlocked {
                date,
                slot_label,
                reason,
            } => {
                let day = self.slots.entry(*date).or_default();
                if day.contains_key(slot_label) {
                    return false;
                }
                day.insert(
                    slot_label.clone(),
                    SlotBlock {
                        date: *date,
                        slot_label: slot_label.clone(),
                        reason: reason.clone(),
                    },
                );
                true
            }
            BlockEvent::SlotUnblocked { date, slot_label } => {
                let Some(day) = self.slots.get_mut(date) else {
                    return false;
                };
                let removed = day.remove(slot_label).is_some();
                if day.is_empty() {
                    self.slots.remove(date);
                }
                removed
            }
            BlockEvent::RecurringBlockAdded { block } => {
                self.recurring.insert(block.id, block.clone()).is_none()
            }
            BlockEvent::RecurringBlockRemoved { id } => self.recurring.remove(id).is_some(),
        }
    }

    pub fn has_full_day(&self, date: CalendarDate) -> bool {
        self.full_days.contains_key(&date)
    }

    pub fn has_slot_block(&self, date: CalendarDate, slot_label: &str) -> bool {
        self.slots
            .get(&date)
            .is_some_and(|day| day.contains_key(slot_label))
    }

    pub fn recurring_count(&self) -> usize {
        self.recurring.len()
    }

    pub fn recurring(&self, id: &RecurringBlockId) -> Option<&RecurringBlock> {
        self.recurring.get(id)
    }

    pub fn full_days_in(&self, range: DateRange) -> impl Iterator<Item = &FullDayBlock> {
        self.full_days.range(range.start..=range.end).map(|(_, b)| b)
    }

    pub fn slot_blocks_in(&self, range: DateRange) -> impl Iterator<Item = &SlotBlock> {
        self.slots
            .range(range.start..=range.end)
            .flat_map(|(_, day)| day.values())
    }

    pub fn recurring_blocks(&self) -> impl Iterator<Item = &RecurringBlock> {
        self.recurring.values()
    }

    pub fn recurring_active_on(&self, date: CalendarDate) -> impl Iterator<Item = &RecurringBlock> {
        self.recurring.values().filter(move |rb| rb.is_active_on(date))
    }

    /// One range read per block kind.
    pub fn view(&self, range: DateRange) -> RangeView {
        RangeView {
            full_days: self.full_days_in(range).map(|b| b.date).collect(),
            slots: self
                .slots
                .range(range.start..=range.end)
                .map(|(date, day)| (*date, day.keys().cloned().collect()))
                .collect(),
            recurring: self
                .recurring
                .values()
                .filter(|rb| rb.overlaps(&range))
                .cloned()
                .collect(),
        }
    }

    /// Minimal event list that recreates this state.
    pub fn to_events(&self) -> Vec<BlockEvent> {
        let mut events = Vec::new();
        for block in self.full_days.values() {
            events.push(BlockEvent::FullDayBlocked {
                date: block.date,
                reason: block.reason.clone(),
            });
        }
        for block in self.slots.values().flat_map(|day| day.values()) {
            events.push(BlockEvent::SlotBlocked {
                date: block.date,
                slot_label: block.slot_label.clone(),
                reason: block.reason.clone(),
            });
        }
        for block in self.recurring.values() {
            events.push(BlockEvent::RecurringBlockAdded {
                block: block.clone(),
            });
        }
        events
    }

    /// Events that drop everything that ended before `horizon`: one-off
    /// blocks dated earlier and recurring blocks whose window closed earlier.
    pub fn retention_events(&self, horizon: CalendarDate) -> Vec<BlockEvent> {
        let mut events: Vec<BlockEvent> = self
            .recurring
            .values()
            .filter(|rb| rb.effective_until < horizon)
            .map(|rb| BlockEvent::RecurringBlockRemoved { id: rb.id })
            .collect();
        events.extend(
            self.full_days
                .range(..horizon)
                .map(|(date, _)| BlockEvent::FullDayUnblocked { date: *date }),
        );
        events.extend(
            self.slots
                .range(..horizon)
                .flat_map(|(_, day)| day.values())
                .map(|b| BlockEvent::SlotUnblocked {
                    date: b.date,
                    slot_label: b.slot_label.clone(),
                }),
        );
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn d(s: &str) -> CalendarDate {
        s.parse().unwrap()
    }

    fn slot(date: &str, label: &str) -> BlockEvent {
        BlockEvent::SlotBlocked {
            date: d(date),
            slot_label: label.into(),
            reason: None,
        }
    }

    fn monday_block(from: &str, until: &str) -> RecurringBlock {
        RecurringBlock {
            id: Ulid::new(),
            day_of_week: 1,
            start_slot_label: "6:30 PM".into(),
            end_slot_label: "8:00 PM".into(),
            effective_from: d(from),
            effective_until: d(until),
            reason: None,
        }
    }

    #[test]
    fn full_day_insert_is_idempotent() {
        let mut st = BlockState::new();
        let ev = BlockEvent::FullDayBlocked {
            date: d("2030-12-25"),
            reason: Some("Holiday".into()),
        };
        assert!(st.apply(&ev));
        assert!(!st.apply(&ev));
        assert_eq!(st.full_days_in(DateRange::single(d("2030-12-25"))).count(), 1);
    }

    #[test]
    fn slot_block_unique_per_date_and_label() {
        let mut st = BlockState::new();
        assert!(st.apply(&slot("2030-05-04", "11:00 AM")));
        assert!(!st.apply(&slot("2030-05-04", "11:00 AM")));
        assert!(st.apply(&slot("2030-05-05", "11:00 AM")));
        assert_eq!(
            st.slot_blocks_in(DateRange::new(d("2030-05-01"), d("2030-05-31")).unwrap())
                .count(),
            2
        );
    }

    #[test]
    fn unblock_absent_reports_no_change() {
        let mut st = BlockState::new();
        assert!(!st.apply(&BlockEvent::SlotUnblocked {
            date: d("2030-05-04"),
            slot_label: "11:00 AM".into(),
        }));
        assert!(!st.apply(&BlockEvent::FullDayUnblocked { date: d("2030-05-04") }));
        assert!(!st.apply(&BlockEvent::RecurringBlockRemoved { id: Ulid::new() }));
    }

    #[test]
    fn unblocking_last_slot_drops_the_day_entry() {
        let mut st = BlockState::new();
        st.apply(&slot("2030-05-04", "11:00 AM"));
        st.apply(&BlockEvent::SlotUnblocked {
            date: d("2030-05-04"),
            slot_label: "11:00 AM".into(),
        });
        assert!(st.view(DateRange::single(d("2030-05-04"))).slots.is_empty());
    }

    #[test]
    fn range_reads_respect_bounds() {
        let mut st = BlockState::new();
        for date in ["2030-05-01", "2030-05-15", "2030-06-01"] {
            st.apply(&BlockEvent::FullDayBlocked {
                date: d(date),
                reason: None,
            });
            st.apply(&slot(date, "1:00 PM"));
        }
        let range = DateRange::new(d("2030-05-01"), d("2030-05-31")).unwrap();
        let view = st.view(range);
        assert_eq!(view.full_days.len(), 2);
        assert_eq!(view.slots.len(), 2);
        assert!(!view.full_days.contains(&d("2030-06-01")));
    }

    #[test]
    fn view_keeps_only_overlapping_recurring_blocks() {
        let mut st = BlockState::new();
        let inside = monday_block("2030-01-01", "2030-03-31");
        let outside = monday_block("2030-06-01", "2030-06-30");
        st.apply(&BlockEvent::RecurringBlockAdded { block: inside.clone() });
        st.apply(&BlockEvent::RecurringBlockAdded { block: outside });
        let view = st.view(DateRange::new(d("2030-02-01"), d("2030-02-28")).unwrap());
        assert_eq!(view.recurring, vec![inside]);
        // 2030-02-04 is a Monday
        assert_eq!(view.recurring_active_on(d("2030-02-04")).count(), 1);
        assert_eq!(view.recurring_active_on(d("2030-02-05")).count(), 0);
    }

    #[test]
    fn to_events_rebuilds_equal_state() {
        let mut st = BlockState::new();
        st.apply(&BlockEvent::FullDayBlocked {
            date: d("2030-12-25"),
            reason: Some("Holiday".into()),
        });
        st.apply(&slot("2030-05-04", "11:00 AM"));
        st.apply(&BlockEvent::RecurringBlockAdded {
            block: monday_block("2030-01-01", "2030-03-31"),
        });

        let mut rebuilt = BlockState::new();
        for ev in st.to_events() {
            rebuilt.apply(&ev);
        }
        assert_eq!(rebuilt.to_events(), st.to_events());
    }

    #[test]
    fn retention_targets_only_stale_entries() {
        let mut st = BlockState::new();
        let expired = monday_block("2030-01-01", "2030-01-31");
        let live = monday_block("2030-01-01", "2030-12-31");
        // Ended, but inside the retention window.
        let recently_ended = monday_block("2030-01-01", "2030-02-15");
        st.apply(&BlockEvent::RecurringBlockAdded { block: expired.clone() });
        st.apply(&BlockEvent::RecurringBlockAdded { block: live });
        st.apply(&BlockEvent::RecurringBlockAdded { block: recently_ended });
        st.apply(&slot("2030-01-02", "6:30 PM"));
        st.apply(&slot("2030-03-02", "6:30 PM"));

        let events = st.retention_events(d("2030-02-01"));
        assert_eq!(
            events,
            vec![
                BlockEvent::RecurringBlockRemoved { id: expired.id },
                BlockEvent::SlotUnblocked {
                    date: d("2030-01-02"),
                    slot_label: "6:30 PM".into(),
                },
            ]
        );
    }
}
