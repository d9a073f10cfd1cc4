use super::DataMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub name: String,
    pub r#type: String,
    pub spec: DataMap,
    pub version: String,
    pub cooldown_s: u64,
    pub level: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Policy {
    pub fn new(
        name: impl Into<String>,
        r#type: impl Into<String>,
        spec: DataMap,
        cooldown_s: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            r#type: r#type.into(),
            spec,
            version: "1.0".to_string(),
            cooldown_s,
            level: 0,
            created_at: now,
            updated_at: None,
        }
    }
}

/// A `ClusterPolicy` binding, unique on `(cluster_id, policy_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterPolicyBinding {
    pub cluster_id: Uuid,
    pub policy_id: Uuid,
    pub priority: i32,
    pub enabled: bool,
    pub last_op: Option<DateTime<Utc>>,
    pub data: DataMap,
}

impl ClusterPolicyBinding {
    pub fn new(cluster_id: Uuid, policy_id: Uuid, priority: i32) -> Self {
        Self {
            cluster_id,
            policy_id,
            priority,
            enabled: true,
            last_op: None,
            data: DataMap::new(),
        }
    }

    pub fn cooldown_in_progress(&self, cooldown_s: u64, now: DateTime<Utc>) -> bool {
        match self.last_op {
            Some(last) => (now - last).num_seconds() < cooldown_s as i64,
            None => false,
        }
    }
}
