//! Advisory cluster/node locking on top of the storage adapter (design notes
//! §4.2).
//!
//! Acquisitions always follow the total order *cluster first, then nodes in
//! ascending id* — violating that order is a programmer error, not a runtime
//! condition this module can defend against. Locks are try-acquire: callers
//! that hit [`crate::error::EngineError::LockContention`] are expected to
//! re-poll rather than park on a condition variable, matching the
//! dispatcher's poll-and-execute model.

use crate::error::{EngineError, Result};
use crate::model::{LockScope, LockSemantics};
use crate::storage::{LockOutcome, StorageAdapter};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub struct LockManager {
    storage: Arc<dyn StorageAdapter>,
    lock_retention_s: u64,
}

impl LockManager {
    pub fn new(storage: Arc<dyn StorageAdapter>, lock_retention_s: u64) -> Self {
        Self { storage, lock_retention_s }
    }

    pub async fn acquire_cluster(
        &self,
        cluster_id: Uuid,
        action_id: Uuid,
        semantics: LockSemantics,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match self
            .storage
            .cluster_lock_acquire(cluster_id, action_id, semantics, now, self.lock_retention_s)
            .await?
        {
            LockOutcome::Acquired | LockOutcome::AlreadyHeldBySelf => Ok(()),
            LockOutcome::Contention => Err(EngineError::LockContention(format!("cluster {cluster_id}"))),
        }
    }

    pub async fn release_cluster(&self, cluster_id: Uuid, action_id: Uuid) -> Result<()> {
        self.storage.cluster_lock_release(cluster_id, action_id).await
    }

    pub async fn acquire_node(&self, node_id: Uuid, action_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        match self
            .storage
            .node_lock_acquire(node_id, action_id, now, self.lock_retention_s)
            .await?
        {
            LockOutcome::Acquired | LockOutcome::AlreadyHeldBySelf => Ok(()),
            LockOutcome::Contention => Err(EngineError::LockContention(format!("node {node_id}"))),
        }
    }

    pub async fn release_node(&self, node_id: Uuid, action_id: Uuid) -> Result<()> {
        self.storage.node_lock_release(node_id, action_id).await
    }

    /// Acquires a node lock for every id in `node_ids`, in ascending order;
    /// on the first contention all previously-acquired locks in this batch
    /// are released and the error is returned.
    pub async fn acquire_nodes_ascending(
        &self,
        mut node_ids: Vec<Uuid>,
        action_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        node_ids.sort();
        let mut acquired = Vec::with_capacity(node_ids.len());
        for node_id in node_ids {
            match self.acquire_node(node_id, action_id, now).await {
                Ok(()) => acquired.push(node_id),
                Err(e) => {
                    for id in acquired {
                        let _ = self.release_node(id, action_id).await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    pub async fn holders(&self, scope: LockScope, resource_id: Uuid) -> Result<Vec<Uuid>> {
        self.storage.lock_holders(scope, resource_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn contention_surfaces_as_lock_contention_error() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorage::new());
        let manager = LockManager::new(storage, 600);
        let cluster_id = Uuid::new_v4();
        let a1 = Uuid::new_v4();
        let a2 = Uuid::new_v4();
        let now = Utc::now();

        manager
            .acquire_cluster(cluster_id, a1, LockSemantics::Exclusive, now)
            .await
            .unwrap();
        let err = manager
            .acquire_cluster(cluster_id, a2, LockSemantics::Exclusive, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LockContention(_)));
    }

    #[tokio::test]
    async fn batch_acquire_rolls_back_on_partial_contention() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorage::new());
        let manager = LockManager::new(storage, 600);
        let n1 = Uuid::new_v4();
        let n2 = Uuid::new_v4();
        let now = Utc::now();
        let holder = Uuid::new_v4();
        manager.acquire_node(n2, holder, now).await.unwrap();

        let action_id = Uuid::new_v4();
        let err = manager
            .acquire_nodes_ascending(vec![n1, n2], action_id, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LockContention(_)));
        assert!(manager.holders(LockScope::Node, n1).await.unwrap().is_empty());
    }
}
