use super::DataMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A node's typed specification, immutable after creation except for
/// `name`/`metadata` (design notes §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    pub r#type: String,
    pub spec: DataMap,
    pub metadata: DataMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn new(name: impl Into<String>, r#type: impl Into<String>, spec: DataMap, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            r#type: r#type.into(),
            spec,
            metadata: DataMap::new(),
            created_at: now,
            updated_at: None,
        }
    }
}
