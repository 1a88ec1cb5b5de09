use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar date with no time-of-day or zone attached.
pub type CalendarDate = NaiveDate;

/// Recurring block identifier.
pub type RecurringBlockId = Ulid;

/// Day-of-week index, 0 = Sunday .. 6 = Saturday.
pub fn day_index(date: CalendarDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

pub fn weekday_from_index(idx: u8) -> Option<Weekday> {
    match idx {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

/// Inclusive calendar-date range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: CalendarDate,
    pub end: CalendarDate,
}

impl DateRange {
    /// Returns `None` when `start > end`.
    pub fn new(start: CalendarDate, end: CalendarDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn single(date: CalendarDate) -> Self {
        Self { start: date, end: date }
    }

    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: CalendarDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Dates in ascending order. Pure calendar succession, never clock arithmetic.
    pub fn days(&self) -> impl Iterator<Item = CalendarDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

/// One bookable slot of a schedule. Compared by label, never by clock time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDefinition {
    pub label: String,
    pub ordinal: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullDayBlock {
    pub date: CalendarDate,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotBlock {
    pub date: CalendarDate,
    pub slot_label: String,
    pub reason: Option<String>,
}

/// Weekly exclusion of the slot range `start_slot_label..=end_slot_label`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringBlock {
    pub id: RecurringBlockId,
    pub day_of_week: u8,
    pub start_slot_label: String,
    pub end_slot_label: String,
    pub effective_from: CalendarDate,
    pub effective_until: CalendarDate,
    pub reason: Option<String>,
}

impl RecurringBlock {
    pub fn is_active_on(&self, date: CalendarDate) -> bool {
        day_index(date) == self.day_of_week
            && self.effective_from <= date
            && date <= self.effective_until
    }

    pub fn overlaps(&self, range: &DateRange) -> bool {
        self.effective_from <= range.end && range.start <= self.effective_until
    }
}

/// Durable mutation record. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockEvent {
    FullDayBlocked {
        date: CalendarDate,
        reason: Option<String>,
    },
    FullDayUnblocked {
        date: CalendarDate,
    },
    SlotBlocked {
        date: CalendarDate,
        slot_label: String,
        reason: Option<String>,
    },
    SlotUnblocked {
        date: CalendarDate,
        slot_label: String,
    },
    RecurringBlockAdded {
        block: RecurringBlock,
    },
    RecurringBlockRemoved {
        id: RecurringBlockId,
    },
}

/// What a store mutation did. `NotFound` is a successful no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied,
    Unchanged,
    NotFound,
}

impl MutationOutcome {
    pub fn changed(self) -> bool {
        matches!(self, MutationOutcome::Applied)
    }
}

// ── Query result types ───────────────────────────────────────────

/// Derived per-date availability. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilitySnapshot {
    pub date: CalendarDate,
    pub is_fully_blocked: bool,
    /// Catalog labels excluded on this date, in catalog order, each once.
    pub blocked_slot_labels: Vec<String>,
    pub available_slot_labels: Vec<String>,
}

/// Where a blocked time comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockSource {
    Slot,
    Recurring,
}

impl BlockSource {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockSource::Slot => "slot",
            BlockSource::Recurring => "recurring",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedTimeInfo {
    pub date: CalendarDate,
    pub slot_label: String,
    pub source: BlockSource,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> CalendarDate {
        s.parse().unwrap()
    }

    #[test]
    fn day_index_starts_on_sunday() {
        assert_eq!(day_index(d("2026-10-18")), 0); // Sunday
        assert_eq!(day_index(d("2026-10-19")), 1); // Monday
        assert_eq!(day_index(d("2026-10-24")), 6); // Saturday
        assert_eq!(weekday_from_index(1), Some(Weekday::Mon));
        assert_eq!(weekday_from_index(7), None);
    }

    #[test]
    fn range_rejects_inverted_bounds() {
        assert!(DateRange::new(d("2026-10-20"), d("2026-10-19")).is_none());
        assert!(DateRange::new(d("2026-10-20"), d("2026-10-20")).is_some());
    }

    #[test]
    fn range_days_cross_month_and_dst_edges() {
        // US DST ends 2026-11-01; calendar iteration must not care.
        let r = DateRange::new(d("2026-10-30"), d("2026-11-02")).unwrap();
        let days: Vec<_> = r.days().collect();
        assert_eq!(
            days,
            vec![d("2026-10-30"), d("2026-10-31"), d("2026-11-01"), d("2026-11-02")]
        );
        assert_eq!(r.len_days(), 4);
    }

    #[test]
    fn range_days_leap_day() {
        let r = DateRange::new(d("2028-02-28"), d("2028-03-01")).unwrap();
        assert_eq!(r.days().count(), 3);
    }

    #[test]
    fn recurring_active_window_is_inclusive() {
        let rb = RecurringBlock {
            id: Ulid::new(),
            day_of_week: 1,
            start_slot_label: "6:30 PM".into(),
            end_slot_label: "8:00 PM".into(),
            effective_from: d("2026-10-19"),
            effective_until: d("2026-11-02"),
            reason: None,
        };
        assert!(rb.is_active_on(d("2026-10-19")));
        assert!(rb.is_active_on(d("2026-11-02")));
        assert!(!rb.is_active_on(d("2026-11-09")));
        assert!(!rb.is_active_on(d("2026-10-20"))); // Tuesday
        assert!(rb.overlaps(&DateRange::single(d("2026-10-25"))));
        assert!(!rb.overlaps(&DateRange::single(d("2026-11-03"))));
    }
}
