use super::DataMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Lifecycle states an action moves through from creation to a terminal
/// outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    Init,
    Waiting,
    Ready,
    Running,
    Suspended,
    Succeeded,
    Failed,
    Cancelled,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Succeeded | ActionStatus::Failed | ActionStatus::Cancelled
        )
    }
}

/// Whether an action was requested directly or derived from a parent action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionCause {
    RpcRequest,
    DerivedAction,
}

/// A pending cooperative cancel/suspend/resume signal, checked by the
/// executor at its yield points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionSignal {
    Cancel,
    Suspend,
    Resume,
}

/// The result an executor hands back to the worker frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionResult {
    Ok,
    Error,
    Retry,
    Cancel,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub name: String,
    pub target: Uuid,
    pub action: String,
    pub cause: ActionCause,
    pub owner: Option<String>,
    /// -1 means one-shot.
    pub interval_s: i64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub timeout_s: u64,
    pub status: ActionStatus,
    pub status_reason: String,
    pub inputs: DataMap,
    pub outputs: DataMap,
    pub data: DataMap,
    pub depends_on: HashSet<Uuid>,
    pub depended_by: HashSet<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Action {
    pub fn new(
        name: impl Into<String>,
        target: Uuid,
        verb: impl Into<String>,
        cause: ActionCause,
        timeout_s: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            target,
            action: verb.into(),
            cause,
            owner: None,
            interval_s: -1,
            start_time: None,
            end_time: None,
            timeout_s,
            status: ActionStatus::Ready,
            status_reason: String::new(),
            inputs: DataMap::new(),
            outputs: DataMap::new(),
            data: DataMap::new(),
            depends_on: HashSet::new(),
            depended_by: HashSet::new(),
            created_at: now,
            updated_at: None,
        }
    }

    pub fn is_timeout(&self, now: DateTime<Utc>) -> bool {
        match self.start_time {
            Some(start) => (now - start).num_seconds() > self.timeout_s as i64,
            None => false,
        }
    }

    /// The verb prefix used for polymorphic dispatch:
    /// `CLUSTER_CREATE` -> `"CLUSTER"`.
    pub fn verb_prefix(&self) -> &str {
        self.action.split('_').next().unwrap_or("")
    }

    pub fn check_error(&mut self, reason: impl Into<String>) {
        self.data
            .insert("status".to_string(), serde_json::json!("CHECK_ERROR"));
        self.data
            .insert("reason".to_string(), serde_json::json!(reason.into()));
    }

    pub fn check_ok(&mut self, reason: impl Into<String>) {
        self.data
            .insert("status".to_string(), serde_json::json!("CHECK_OK"));
        self.data
            .insert("reason".to_string(), serde_json::json!(reason.into()));
    }

    pub fn is_check_error(&self) -> bool {
        self.data.get("status").and_then(|v| v.as_str()) == Some("CHECK_ERROR")
    }

    pub fn check_reason(&self) -> Option<String> {
        self.data
            .get("reason")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_prefix_splits_on_first_underscore() {
        let a = Action::new(
            "scale",
            Uuid::new_v4(),
            "CLUSTER_SCALE_OUT",
            ActionCause::RpcRequest,
            3600,
            Utc::now(),
        );
        assert_eq!(a.verb_prefix(), "CLUSTER");
    }

    #[test]
    fn timeout_is_relative_to_start_time() {
        let mut a = Action::new(
            "check",
            Uuid::new_v4(),
            "NODE_CHECK",
            ActionCause::RpcRequest,
            10,
            Utc::now(),
        );
        let t0 = Utc::now();
        a.start_time = Some(t0);
        assert!(!a.is_timeout(t0 + chrono::Duration::seconds(5)));
        assert!(a.is_timeout(t0 + chrono::Duration::seconds(11)));
    }

    #[test]
    fn check_error_sets_status_and_reason() {
        let mut a = Action::new(
            "scale",
            Uuid::new_v4(),
            "CLUSTER_SCALE_OUT",
            ActionCause::RpcRequest,
            3600,
            Utc::now(),
        );
        a.check_error("Attempted scaling exceeds maximum size");
        assert!(a.is_check_error());
        assert_eq!(
            a.check_reason().as_deref(),
            Some("Attempted scaling exceeds maximum size")
        );
    }
}
