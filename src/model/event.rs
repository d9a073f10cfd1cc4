use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Append-only audit record (design notes §3). Every emission is mirrored to
/// a `tracing` log line at the matching level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub action_id: Option<Uuid>,
    pub obj_type: String,
    pub obj_id: Uuid,
    pub obj_name: String,
    pub status: String,
    pub reason: String,
    pub user: String,
    pub project: String,
}

impl Event {
    pub fn emit(&self) {
        let msg = format!(
            "{} {} {} -> {} ({})",
            self.obj_type, self.obj_name, self.obj_id, self.status, self.reason
        );
        match self.level {
            EventLevel::Debug => tracing::debug!("{msg}"),
            EventLevel::Info => tracing::info!("{msg}"),
            EventLevel::Warning => tracing::warn!("{msg}"),
            EventLevel::Error | EventLevel::Critical => tracing::error!("{msg}"),
        }
    }
}
