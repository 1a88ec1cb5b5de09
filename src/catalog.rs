//! Slot catalog: the single place that decides which schedule a date uses.

use chrono::{Datelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::model::{weekday_from_index, CalendarDate, SlotDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    Weekday,
    Weekend,
}

impl ScheduleKind {
    pub fn for_weekday(day: Weekday) -> Self {
        match day {
            Weekday::Sat | Weekday::Sun => ScheduleKind::Weekend,
            _ => ScheduleKind::Weekday,
        }
    }

    /// `None` for an index outside 0..=6.
    pub fn for_day_index(idx: u8) -> Option<Self> {
        weekday_from_index(idx).map(Self::for_weekday)
    }

    pub fn for_date(date: CalendarDate) -> Self {
        Self::for_weekday(date.weekday())
    }
}

const DEFAULT_WEEKDAY: &[&str] = &["6:30 PM", "7:00 PM", "7:30 PM", "8:00 PM", "8:30 PM"];

const DEFAULT_WEEKEND: &[&str] = &[
    "11:00 AM", "11:30 AM", "12:00 PM", "12:30 PM", "1:00 PM", "1:30 PM", "2:00 PM", "2:30 PM",
    "3:00 PM", "3:30 PM", "4:00 PM", "4:30 PM", "5:00 PM", "5:30 PM", "6:00 PM", "6:30 PM",
    "7:00 PM", "7:30 PM", "8:00 PM",
];

/// Raw catalog as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSpec {
    pub weekday: Vec<String>,
    pub weekend: Vec<String>,
}

impl Default for CatalogSpec {
    fn default() -> Self {
        Self {
            weekday: DEFAULT_WEEKDAY.iter().map(|s| s.to_string()).collect(),
            weekend: DEFAULT_WEEKEND.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("{0:?} schedule is empty")]
    Empty(ScheduleKind),
    #[error("{kind:?} schedule lists {label:?} twice")]
    DuplicateLabel { kind: ScheduleKind, label: String },
    #[error("{0:?} schedule contains a blank label")]
    BlankLabel(ScheduleKind),
}

/// Ordered weekday and weekend slot lists. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCatalog {
    weekday: Vec<SlotDefinition>,
    weekend: Vec<SlotDefinition>,
}

impl Default for SlotCatalog {
    fn default() -> Self {
        Self::from_spec(CatalogSpec::default()).expect("default catalog is well-formed")
    }
}

impl SlotCatalog {
    pub fn new<W, E>(weekday: W, weekend: E) -> Result<Self, CatalogError>
    where
        W: IntoIterator,
        W::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self::from_spec(CatalogSpec {
            weekday: weekday.into_iter().map(Into::into).collect(),
            weekend: weekend.into_iter().map(Into::into).collect(),
        })
    }

    pub fn from_spec(spec: CatalogSpec) -> Result<Self, CatalogError> {
        Ok(Self {
            weekday: build_schedule(ScheduleKind::Weekday, spec.weekday)?,
            weekend: build_schedule(ScheduleKind::Weekend, spec.weekend)?,
        })
    }

    pub fn schedule(&self, kind: ScheduleKind) -> &[SlotDefinition] {
        match kind {
            ScheduleKind::Weekday => &self.weekday,
            ScheduleKind::Weekend => &self.weekend,
        }
    }

    /// Every slot that could exist on `date`, in ordinal order.
    pub fn slots_for(&self, date: CalendarDate) -> &[SlotDefinition] {
        self.schedule(ScheduleKind::for_date(date))
    }

    pub fn ordinal_of(&self, kind: ScheduleKind, label: &str) -> Option<u32> {
        self.schedule(kind)
            .iter()
            .find(|s| s.label == label)
            .map(|s| s.ordinal)
    }

    pub fn contains(&self, date: CalendarDate, label: &str) -> bool {
        self.ordinal_of(ScheduleKind::for_date(date), label).is_some()
    }
}

fn build_schedule(kind: ScheduleKind, labels: Vec<String>) -> Result<Vec<SlotDefinition>, CatalogError> {
    if labels.is_empty() {
        return Err(CatalogError::Empty(kind));
    }
    let mut out: Vec<SlotDefinition> = Vec::with_capacity(labels.len());
    for (ordinal, label) in labels.into_iter().enumerate() {
        let label = label.trim().to_string();
        if label.is_empty() {
            return Err(CatalogError::BlankLabel(kind));
        }
        if out.iter().any(|s| s.label == label) {
            return Err(CatalogError::DuplicateLabel { kind, label });
        }
        out.push(SlotDefinition {
            label,
            ordinal: ordinal as u32,
        });
    }
    Ok(out)
}
