use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockSemantics {
    Exclusive,
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockScope {
    Cluster,
    Node,
}

/// One row of the lock table: a resource id (cluster or node) and the set of
/// action-ids currently holding it (more than one only when all holders are
/// SHARED).
#[derive(Debug, Clone)]
pub struct LockRow {
    pub resource_id: Uuid,
    pub action_ids: Vec<Uuid>,
    pub semantics: LockSemantics,
}
