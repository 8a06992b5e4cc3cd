//! Event bus for broadcasting recorded visits

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A counted visit, as published to live subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitEvent {
    pub path: String,
    pub domain: String,
    pub country: Option<String>,
    pub is_new_visitor: bool,
    pub visited_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<VisitEvent>>,
}

impl EventBus {
    pub fn new(sender: broadcast::Sender<Arc<VisitEvent>>) -> Self {
        Self { sender }
    }

    pub fn publish(&self, event: VisitEvent) {
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<VisitEvent>> {
        self.sender.subscribe()
    }
}
