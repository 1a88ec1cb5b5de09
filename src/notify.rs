use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{BlockEvent, CalendarDate};

const CHANNEL_CAPACITY: usize = 256;

/// What a subscriber watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Full-day and slot changes on one date.
    Date(CalendarDate),
    /// Any recurring block added or removed.
    Recurring,
}

impl Topic {
    pub fn of(event: &BlockEvent) -> Self {
        match event {
            BlockEvent::FullDayBlocked { date, .. }
            | BlockEvent::FullDayUnblocked { date }
            | BlockEvent::SlotBlocked { date, .. }
            | BlockEvent::SlotUnblocked { date, .. } => Topic::Date(*date),
            BlockEvent::RecurringBlockAdded { .. } | BlockEvent::RecurringBlockRemoved { .. } => {
                Topic::Recurring
            }
        }
    }
}

/// Broadcast hub for applied block changes, so booking views can refresh.
pub struct NotifyHub {
    channels: DashMap<Topic, broadcast::Sender<BlockEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a topic. Creates the channel if needed.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<BlockEvent> {
        let sender = self
            .channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, event: &BlockEvent) {
        let topic = Topic::of(event);
        let closed = match self.channels.get(&topic) {
            Some(sender) => sender.send(event.clone()).is_err() && sender.receiver_count() == 0,
            None => false,
        };
        if closed {
            self.channels.remove(&topic);
        }
    }
}
