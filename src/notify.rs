use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::ChangeEvent;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for org-scoped change notifications.
pub struct ChangeFeed {
    channels: DashMap<String, broadcast::Sender<ChangeEvent>>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to changes for an organization. Creates the channel if needed.
    pub fn subscribe(&self, org_id: &str) -> broadcast::Receiver<ChangeEvent> {
        let sender = self
            .channels
            .entry(org_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish to the event's organization. No-op if nobody is listening.
    pub fn publish(&self, event: &ChangeEvent) {
        if let Some(sender) = self.channels.get(&event.org_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop an organization's channel; live receivers see `Closed`.
    pub fn remove(&self, org_id: &str) {
        self.channels.remove(org_id);
    }
}
