use std::collections::HashSet;

use crate::catalog::{ScheduleKind, SlotCatalog};
use crate::model::*;

use super::EngineError;

/// Resolve a recurring block's label range to inclusive ordinals in the
/// schedule its weekday uses.
pub fn ordinal_range(
    catalog: &SlotCatalog,
    day_of_week: u8,
    start_slot_label: &str,
    end_slot_label: &str,
) -> Result<(u32, u32), EngineError> {
    let kind = ScheduleKind::for_day_index(day_of_week)
        .ok_or_else(|| EngineError::InvalidRange(format!("day of week {day_of_week} is not in 0..=6")))?;
    let start = catalog.ordinal_of(kind, start_slot_label).ok_or_else(|| {
        EngineError::InvalidRange(format!(
            "{start_slot_label:?} is not a {kind:?} slot"
        ))
    })?;
    let end = catalog.ordinal_of(kind, end_slot_label).ok_or_else(|| {
        EngineError::InvalidRange(format!("{end_slot_label:?} is not a {kind:?} slot"))
    })?;
    if start > end {
        return Err(EngineError::InvalidRange(format!(
            "{start_slot_label:?} comes after {end_slot_label:?}"
        )));
    }
    Ok((start, end))
}

/// Slot labels a recurring block excludes on `date`.
///
/// The caller picks blocks via `recurring_blocks_active_on`; a block that is
/// not active on `date`, or whose labels have left the catalog, expands to nothing.
pub fn expand(catalog: &SlotCatalog, block: &RecurringBlock, date: CalendarDate) -> HashSet<String> {
    if !block.is_active_on(date) {
        return HashSet::new();
    }
    let Ok((start, end)) = ordinal_range(
        catalog,
        block.day_of_week,
        &block.start_slot_label,
        &block.end_slot_label,
    ) else {
        tracing::warn!(
            "recurring block {} references labels no longer in the catalog",
            block.id
        );
        return HashSet::new();
    };
    catalog
        .slots_for(date)
        .iter()
        .filter(|s| (start..=end).contains(&s.ordinal))
        .map(|s| s.label.clone())
        .collect()
}
