use thiserror::Error;

use crate::model::CalendarDate;

/// Unblocking something absent is not an error; see `MutationOutcome::NotFound`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("slot {label:?} is not offered on {date}")]
    InvalidSlotLabel { date: CalendarDate, label: String },
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("{date} is in the past (today is {today})")]
    InvalidDate {
        date: CalendarDate,
        today: CalendarDate,
    },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("block store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("booking store unavailable: {0}")]
    BookingStore(String),
}

impl EngineError {
    /// Stable code for callers rendering a corrective message.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidSlotLabel { .. } => "InvalidSlotLabel",
            EngineError::InvalidRange(_) => "InvalidRange",
            EngineError::InvalidDate { .. } => "InvalidDate",
            EngineError::LimitExceeded(_) => "LimitExceeded",
            EngineError::StoreUnavailable(_) => "StoreUnavailable",
            EngineError::BookingStore(_) => "BookingStore",
        }
    }

    /// Validation failures are the caller's to fix and are never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidSlotLabel { .. }
                | EngineError::InvalidRange(_)
                | EngineError::InvalidDate { .. }
                | EngineError::LimitExceeded(_)
        )
    }
}
