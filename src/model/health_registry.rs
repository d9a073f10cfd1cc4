use super::DataMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckType {
    NodeStatusPolling,
    LifecycleEvents,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRegistry {
    pub id: Uuid,
    pub cluster_id: Uuid,
    pub check_type: CheckType,
    pub interval_s: u64,
    pub params: DataMap,
    pub engine_id: Option<String>,
    pub enabled: bool,
}

impl HealthRegistry {
    pub fn new(cluster_id: Uuid, check_type: CheckType, interval_s: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            cluster_id,
            check_type,
            interval_s,
            params: DataMap::new(),
            engine_id: None,
            enabled: true,
        }
    }
}
