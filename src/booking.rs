//! Read-only port to the external Booking Store.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;

use crate::model::{CalendarDate, DateRange};

/// Source of confirmed, non-cancelled bookings. Authoritative; the engine
/// never writes to it.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn occupied_slots(&self, date: CalendarDate) -> io::Result<HashSet<String>>;

    /// Batched read for a whole range. Dates without bookings may be absent.
    async fn occupied_slots_in(
        &self,
        range: DateRange,
    ) -> io::Result<HashMap<CalendarDate, HashSet<String>>> {
        let mut out = HashMap::new();
        for date in range.days() {
            let slots = self.occupied_slots(date).await?;
            if !slots.is_empty() {
                out.insert(date, slots);
            }
        }
        Ok(out)
    }
}

/// No bookings at all.
#[derive(Debug, Default)]
pub struct NoBookings;

#[async_trait]
impl BookingStore for NoBookings {
    async fn occupied_slots(&self, _date: CalendarDate) -> io::Result<HashSet<String>> {
        Ok(HashSet::new())
    }

    async fn occupied_slots_in(
        &self,
        _range: DateRange,
    ) -> io::Result<HashMap<CalendarDate, HashSet<String>>> {
        Ok(HashMap::new())
    }
}

/// Occupancy held in memory, for embedding the engine next to a booking flow.
#[derive(Debug, Default)]
pub struct InMemoryBookingStore {
    occupied: DashMap<CalendarDate, HashSet<String>>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confirm(&self, date: CalendarDate, slot_label: impl Into<String>) {
        self.occupied.entry(date).or_default().insert(slot_label.into());
    }

    pub fn cancel(&self, date: CalendarDate, slot_label: &str) {
        if let Some(mut slots) = self.occupied.get_mut(&date) {
            slots.remove(slot_label);
        }
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn occupied_slots(&self, date: CalendarDate) -> io::Result<HashSet<String>> {
        Ok(self
            .occupied
            .get(&date)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    async fn occupied_slots_in(
        &self,
        range: DateRange,
    ) -> io::Result<HashMap<CalendarDate, HashSet<String>>> {
        Ok(self
            .occupied
            .iter()
            .filter(|e| range.contains(*e.key()) && !e.value().is_empty())
            .map(|e| (*e.key(), e.value().clone()))
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct BookingRecord {
    date: CalendarDate,
    slot: String,
    #[serde(default = "confirmed")]
    status: String,
}

fn confirmed() -> String {
    "confirmed".to_string()
}

/// Booking export file written by the booking service:
/// `[{ "date": "2026-10-20", "slot": "7:00 PM", "status": "confirmed" }, ...]`.
///
/// Read on every query; a missing file means no bookings.
#[derive(Debug, Clone)]
pub struct FileBookingStore {
    path: PathBuf,
}

impl FileBookingStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn load(&self) -> io::Result<Vec<BookingRecord>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[async_trait]
impl BookingStore for FileBookingStore {
    async fn occupied_slots(&self, date: CalendarDate) -> io::Result<HashSet<String>> {
        Ok(self
            .occupied_slots_in(DateRange::single(date))
            .await?
            .remove(&date)
            .unwrap_or_default())
    }

    async fn occupied_slots_in(
        &self,
        range: DateRange,
    ) -> io::Result<HashMap<CalendarDate, HashSet<String>>> {
        let mut out: HashMap<CalendarDate, HashSet<String>> = HashMap::new();
        for rec in self.load().await? {
            if range.contains(rec.date) && rec.status.eq_ignore_ascii_case("confirmed") {
                out.entry(rec.date).or_default().insert(rec.slot);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> CalendarDate {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn in_memory_confirm_and_cancel() {
        let store = InMemoryBookingStore::new();
        store.confirm(d("2030-01-07"), "7:00 PM");
        store.confirm(d("2030-01-08"), "6:30 PM");
        assert_eq!(store.occupied_slots(d("2030-01-07")).await.unwrap().len(), 1);

        let range = DateRange::single(d("2030-01-07"));
        assert_eq!(store.occupied_slots_in(range).await.unwrap().len(), 1);

        store.cancel(d("2030-01-07"), "7:00 PM");
        assert!(store.occupied_slots(d("2030-01-07")).await.unwrap().is_empty());
        assert!(store.occupied_slots_in(range).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn default_range_read_loops_per_date() {
        struct OnlyMondays;
        #[async_trait]
        impl BookingStore for OnlyMondays {
            async fn occupied_slots(&self, date: CalendarDate) -> io::Result<HashSet<String>> {
                Ok(if crate::model::day_index(date) == 1 {
                    ["7:00 PM".to_string()].into()
                } else {
                    HashSet::new()
                })
            }
        }
        let range = DateRange::new(d("2030-01-01"), d("2030-01-31")).unwrap();
        let got = OnlyMondays.occupied_slots_in(range).await.unwrap();
        assert_eq!(got.len(), 4);
    }

    #[tokio::test]
    async fn file_store_counts_only_confirmed() {
        let dir = std::env::temp_dir().join("availd_test_bookings");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("confirmed_only.bookings.json");
        std::fs::write(
            &path,
            r#"[
                {"date":"2030-01-07","slot":"7:00 PM","status":"confirmed"},
                {"date":"2030-01-07","slot":"7:30 PM","status":"cancelled"},
                {"date":"2030-01-07","slot":"8:00 PM"},
                {"date":"2030-02-07","slot":"8:00 PM"}
            ]"#,
        )
        .unwrap();

        let store = FileBookingStore::new(path.clone());
        let slots = store.occupied_slots(d("2030-01-07")).await.unwrap();
        assert_eq!(slots, ["7:00 PM".to_string(), "8:00 PM".to_string()].into());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn file_store_missing_file_is_empty() {
        let store = FileBookingStore::new(std::env::temp_dir().join("availd_no_such_file.json"));
        assert!(store.occupied_slots(d("2030-01-07")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_store_malformed_is_invalid_data() {
        let dir = std::env::temp_dir().join("availd_test_bookings");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("malformed.bookings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = FileBookingStore::new(path.clone())
            .occupied_slots(d("2030-01-07"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let _ = std::fs::remove_file(&path);
    }
}
