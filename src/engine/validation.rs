use chrono::Days;

use crate::catalog::SlotCatalog;
use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// New blocks may not target a past date, nor one beyond the block horizon.
pub(crate) fn validate_new_block_date(date: CalendarDate, today: CalendarDate) -> Result<(), EngineError> {
    if date < today {
        return Err(EngineError::InvalidDate { date, today });
    }
    if (date - today).num_days() > MAX_BLOCK_HORIZON_DAYS {
        return Err(EngineError::LimitExceeded("date too far in the future"));
    }
    Ok(())
}

pub(crate) fn validate_reason(reason: &Option<String>) -> Result<(), EngineError> {
    if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
        return Err(EngineError::LimitExceeded("reason too long"));
    }
    Ok(())
}

pub(crate) fn validate_slot_label(
    catalog: &SlotCatalog,
    date: CalendarDate,
    label: &str,
) -> Result<(), EngineError> {
    if catalog.contains(date, label) {
        Ok(())
    } else {
        Err(EngineError::InvalidSlotLabel {
            date,
            label: label.to_string(),
        })
    }
}

pub(crate) fn validate_recurring_window(
    from: CalendarDate,
    until: CalendarDate,
) -> Result<(), EngineError> {
    if until < from {
        return Err(EngineError::InvalidDate { date: until, today: from });
    }
    let horizon = from
        .checked_add_days(Days::new(MAX_RECURRING_HORIZON_DAYS as u64))
        .unwrap_or(CalendarDate::MAX);
    if until > horizon {
        return Err(EngineError::LimitExceeded("recurring block reaches too far"));
    }
    Ok(())
}

pub(crate) fn validate_query_range(range: &DateRange) -> Result<(), EngineError> {
    if range.len_days() > MAX_QUERY_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}
