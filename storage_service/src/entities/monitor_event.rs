// storage_service/src/entities/monitor_event.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub event: String,
    pub details: Option<String>,
}

impl MonitorEvent {
    pub fn new(event: &str, details: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            created_at: now,
            event: event.to_string(),
            details,
        }
    }
}
