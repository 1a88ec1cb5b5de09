use std::collections::{HashMap, HashSet};

use crate::catalog::SlotCatalog;
use crate::model::*;

use super::recurrence::expand;
use super::store::RangeView;

// ── Availability Algorithm ────────────────────────────────────────

/// Resolve one date.
///
/// Full-day block: short-circuits, every catalog slot is blocked.
/// Otherwise: blocked = slot blocks ∪ recurring expansions ∪ occupancy,
/// and available = catalog minus blocked, in catalog order.
pub fn resolve_day(
    catalog: &SlotCatalog,
    date: CalendarDate,
    view: &RangeView,
    occupied: Option<&HashSet<String>>,
) -> AvailabilitySnapshot {
    let slots = catalog.slots_for(date);

    if view.full_days.contains(&date) {
        return AvailabilitySnapshot {
            date,
            is_fully_blocked: true,
            blocked_slot_labels: slots.iter().map(|s| s.label.clone()).collect(),
            available_slot_labels: Vec::new(),
        };
    }

    let mut blocked: HashSet<String> = view.slots.get(&date).into_iter().flatten().cloned().collect();
    for rb in view.recurring_active_on(date) {
        blocked.extend(expand(catalog, rb, date));
    }
    if let Some(occupied) = occupied {
        blocked.extend(occupied.iter().cloned());
    }

    let (blocked_slot_labels, available_slot_labels): (Vec<String>, Vec<String>) = slots
        .iter()
        .map(|s| s.label.clone())
        .partition(|label| blocked.contains(label));

    AvailabilitySnapshot {
        date,
        is_fully_blocked: false,
        blocked_slot_labels,
        available_slot_labels,
    }
}

/// Resolve every date in `range`, ascending.
pub fn resolve_range(
    catalog: &SlotCatalog,
    range: DateRange,
    view: &RangeView,
    occupied: &HashMap<CalendarDate, HashSet<String>>,
) -> Vec<AvailabilitySnapshot> {
    range
        .days()
        .map(|date| resolve_day(catalog, date, view, occupied.get(&date)))
        .collect()
}

/// Blocked times with their source, for callers that need reasons.
pub fn blocked_times(
    catalog: &SlotCatalog,
    range: DateRange,
    slot_blocks: &[SlotBlock],
    recurring: &[RecurringBlock],
) -> Vec<BlockedTimeInfo> {
    let mut out = Vec::new();
    for date in range.days() {
        let mut seen: HashSet<&str> = HashSet::new();
        for b in slot_blocks.iter().filter(|b| b.date == date) {
            seen.insert(&b.slot_label);
            out.push(BlockedTimeInfo {
                date,
                slot_label: b.slot_label.clone(),
                source: BlockSource::Slot,
                reason: b.reason.clone(),
            });
        }
        for rb in recurring.iter().filter(|rb| rb.is_active_on(date)) {
            let labels = expand(catalog, rb, date);
            for s in catalog.slots_for(date) {
                if labels.contains(&s.label) && !seen.contains(s.label.as_str()) {
                    out.push(BlockedTimeInfo {
                        date,
                        slot_label: s.label.clone(),
                        source: BlockSource::Recurring,
                        reason: rb.reason.clone(),
                    });
                }
            }
        }
    }
    out
}
