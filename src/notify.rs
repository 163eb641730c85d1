use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::observability;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushNotification {
    pub user_id: String,
    pub title: String,
    pub body: String,
}

/// Fire-and-forget delivery of a message to a user.
pub trait Notifier: Send + Sync {
    /// A missing recipient is a no-op, never an error.
    fn notify(&self, user_id: Option<&str>, title: &str, body: &str);
}

/// Logs every push and fans it out to per-user broadcast channels.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<PushNotification>>,
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

    /// Subscribe to a user's pushes. Creates the channel if needed.
    pub fn subscribe(&self, user_id: &str) -> broadcast::Receiver<PushNotification> {
        let sender = self
            .channels
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    pub fn remove(&self, user_id: &str) {
        self.channels.remove(user_id);
    }
}

impl Notifier for NotifyHub {
    fn notify(&self, user_id: Option<&str>, title: &str, body: &str) {
        let Some(user_id) = user_id.filter(|u| !u.is_empty()) else {
            warn!("cannot send notification, no user id provided");
            return;
        };
        info!(to = user_id, title, body, "push notification");
        metrics::counter!(observability::NOTIFICATIONS_SENT_TOTAL).increment(1);
        if let Some(sender) = self.channels.get(user_id) {
            // nobody listening is fine
            let _ = sender.send(PushNotification {
                user_id: user_id.to_string(),
                title: title.to_string(),
                body: body.to_string(),
            });
        }
    }
}
