//! In-process `StorageAdapter` implementation.
//!
//! A single `parking_lot::RwLock` guards one `Inner` struct holding every
//! collection, so that compound operations (acquire-first-ready, lock
//! steal-on-stale, dependency-edge propagation) are atomic without having to
//! reason about lock ordering across several independently-locked maps.

use super::{LockOutcome, StorageAdapter};
use crate::error::{EngineError, Result};
use crate::model::{
    Action, ActionSignal, ActionStatus, Cluster, ClusterPolicyBinding, Event, HealthRegistry, LockScope,
    LockSemantics, Node, Policy, Profile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct LockHolder {
    action_ids: Vec<Uuid>,
    semantics: LockSemantics,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    clusters: HashMap<Uuid, Cluster>,
    nodes: HashMap<Uuid, Node>,
    profiles: HashMap<Uuid, Profile>,
    policies: HashMap<Uuid, Policy>,
    cluster_policies: HashMap<(Uuid, Uuid), ClusterPolicyBinding>,
    actions: HashMap<Uuid, Action>,
    action_signals: HashMap<Uuid, ActionSignal>,
    cluster_locks: HashMap<Uuid, LockHolder>,
    node_locks: HashMap<Uuid, LockHolder>,
    health_registry: HashMap<Uuid, HealthRegistry>,
    events: Vec<Event>,
}

/// The default, shipped `StorageAdapter`. Suitable both as the engine's
/// running backend and as a deterministic test double.
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(kind: &str, id: Uuid) -> EngineError {
    EngineError::NotFound(format!("{kind} {id} not found"))
}

fn try_acquire(
    table: &mut HashMap<Uuid, LockHolder>,
    resource_id: Uuid,
    action_id: Uuid,
    semantics: LockSemantics,
    now: DateTime<Utc>,
    lock_retention_s: u64,
) -> LockOutcome {
    match table.get_mut(&resource_id) {
        None => {
            table.insert(
                resource_id,
                LockHolder {
                    action_ids: vec![action_id],
                    semantics,
                    updated_at: now,
                },
            );
            LockOutcome::Acquired
        }
        Some(holder) if holder.action_ids.contains(&action_id) => {
            holder.updated_at = now;
            LockOutcome::AlreadyHeldBySelf
        }
        Some(holder)
            if holder.semantics == LockSemantics::Shared && semantics == LockSemantics::Shared =>
        {
            holder.action_ids.push(action_id);
            holder.updated_at = now;
            LockOutcome::Acquired
        }
        Some(holder) => {
            let stale = (now - holder.updated_at).num_seconds() > lock_retention_s as i64;
            if stale {
                *holder = LockHolder {
                    action_ids: vec![action_id],
                    semantics,
                    updated_at: now,
                };
                LockOutcome::Acquired
            } else {
                LockOutcome::Contention
            }
        }
    }
}

fn release(table: &mut HashMap<Uuid, LockHolder>, resource_id: Uuid, action_id: Uuid) {
    if let Some(holder) = table.get_mut(&resource_id) {
        holder.action_ids.retain(|id| *id != action_id);
        if holder.action_ids.is_empty() {
            table.remove(&resource_id);
        }
    }
}

/// Cascades a terminal failure/cancellation to every transitive dependent
/// still non-terminal, per the `WAITING -> FAILED` transition.
fn cascade_failure(actions: &mut HashMap<Uuid, Action>, parent_id: Uuid) {
    let mut queue: VecDeque<Uuid> = actions
        .get(&parent_id)
        .map(|a| a.depended_by.iter().copied().collect())
        .unwrap_or_default();
    while let Some(child_id) = queue.pop_front() {
        let Some(child) = actions.get_mut(&child_id) else { continue };
        if child.status.is_terminal() {
            continue;
        }
        child.status = ActionStatus::Failed;
        child.status_reason = format!("parent {parent_id} did not succeed");
        queue.extend(child.depended_by.iter().copied());
    }
}

/// Decrements `depends_on` of every dependent of a successfully-completed
/// action, promoting any whose last dependency just resolved.
fn propagate_success(actions: &mut HashMap<Uuid, Action>, parent_id: Uuid) {
    let dependents: Vec<Uuid> = actions
        .get(&parent_id)
        .map(|a| a.depended_by.iter().copied().collect())
        .unwrap_or_default();
    for child_id in dependents {
        if let Some(child) = actions.get_mut(&child_id) {
            child.depends_on.remove(&parent_id);
            if child.depends_on.is_empty() && matches!(child.status, ActionStatus::Waiting) {
                child.status = ActionStatus::Ready;
            }
        }
    }
}

fn release_all_locks_for(inner: &mut Inner, action_id: Uuid) {
    for holder in inner.cluster_locks.values_mut() {
        holder.action_ids.retain(|id| *id != action_id);
    }
    inner.cluster_locks.retain(|_, h| !h.action_ids.is_empty());
    for holder in inner.node_locks.values_mut() {
        holder.action_ids.retain(|id| *id != action_id);
    }
    inner.node_locks.retain(|_, h| !h.action_ids.is_empty());
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn cluster_create(&self, cluster: Cluster) -> Result<Uuid> {
        let id = cluster.id;
        self.inner.write().clusters.insert(id, cluster);
        Ok(id)
    }

    async fn cluster_get(&self, id: Uuid) -> Result<Cluster> {
        self.inner
            .read()
            .clusters
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("cluster", id))
    }

    async fn cluster_update(&self, cluster: Cluster) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.clusters.contains_key(&cluster.id) {
            return Err(not_found("cluster", cluster.id));
        }
        inner.clusters.insert(cluster.id, cluster);
        Ok(())
    }

    async fn cluster_delete(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write();
        inner.clusters.remove(&id).ok_or_else(|| not_found("cluster", id))?;
        Ok(())
    }

    async fn cluster_list(&self) -> Result<Vec<Cluster>> {
        Ok(self.inner.read().clusters.values().cloned().collect())
    }

    async fn node_create(&self, node: Node) -> Result<Uuid> {
        let id = node.id;
        self.inner.write().nodes.insert(id, node);
        Ok(id)
    }

    async fn node_get(&self, id: Uuid) -> Result<Node> {
        self.inner.read().nodes.get(&id).cloned().ok_or_else(|| not_found("node", id))
    }

    async fn node_update(&self, node: Node) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.nodes.contains_key(&node.id) {
            return Err(not_found("node", node.id));
        }
        inner.nodes.insert(node.id, node);
        Ok(())
    }

    async fn node_delete(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write();
        inner.nodes.remove(&id).ok_or_else(|| not_found("node", id))?;
        Ok(())
    }

    async fn node_list_by_cluster(&self, cluster_id: Uuid) -> Result<Vec<Node>> {
        Ok(self
            .inner
            .read()
            .nodes
            .values()
            .filter(|n| n.cluster_id == Some(cluster_id))
            .cloned()
            .collect())
    }

    async fn profile_create(&self, profile: Profile) -> Result<Uuid> {
        let id = profile.id;
        self.inner.write().profiles.insert(id, profile);
        Ok(id)
    }

    async fn profile_get(&self, id: Uuid) -> Result<Profile> {
        self.inner
            .read()
            .profiles
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("profile", id))
    }

    async fn profile_list(&self) -> Result<Vec<Profile>> {
        Ok(self.inner.read().profiles.values().cloned().collect())
    }

    async fn policy_create(&self, policy: Policy) -> Result<Uuid> {
        let id = policy.id;
        self.inner.write().policies.insert(id, policy);
        Ok(id)
    }

    async fn policy_get(&self, id: Uuid) -> Result<Policy> {
        self.inner.read().policies.get(&id).cloned().ok_or_else(|| not_found("policy", id))
    }

    async fn policy_list(&self) -> Result<Vec<Policy>> {
        Ok(self.inner.read().policies.values().cloned().collect())
    }

    async fn cluster_policy_attach(&self, binding: ClusterPolicyBinding) -> Result<()> {
        let key = (binding.cluster_id, binding.policy_id);
        self.inner.write().cluster_policies.insert(key, binding);
        Ok(())
    }

    async fn cluster_policy_detach(&self, cluster_id: Uuid, policy_id: Uuid) -> Result<()> {
        self.inner.write().cluster_policies.remove(&(cluster_id, policy_id));
        Ok(())
    }

    async fn cluster_policy_update(&self, binding: ClusterPolicyBinding) -> Result<()> {
        let key = (binding.cluster_id, binding.policy_id);
        self.inner.write().cluster_policies.insert(key, binding);
        Ok(())
    }

    async fn cluster_policy_list(&self, cluster_id: Uuid) -> Result<Vec<ClusterPolicyBinding>> {
        let mut out: Vec<ClusterPolicyBinding> = self
            .inner
            .read()
            .cluster_policies
            .values()
            .filter(|b| b.cluster_id == cluster_id && b.enabled)
            .cloned()
            .collect();
        out.sort_by_key(|b| b.priority);
        Ok(out)
    }

    async fn action_create(&self, action: Action) -> Result<Uuid> {
        let id = action.id;
        self.inner.write().actions.insert(id, action);
        Ok(id)
    }

    async fn action_get(&self, id: Uuid) -> Result<Action> {
        self.inner.read().actions.get(&id).cloned().ok_or_else(|| not_found("action", id))
    }

    async fn action_acquire_first_ready(&self, owner: &str, now: DateTime<Utc>) -> Result<Action> {
        let mut inner = self.inner.write();
        let ready_id = inner
            .actions
            .values()
            .find(|a| matches!(a.status, ActionStatus::Ready))
            .map(|a| a.id);
        match ready_id {
            Some(id) => {
                let action = inner.actions.get_mut(&id).expect("id from same map");
                action.owner = Some(owner.to_string());
                action.start_time = Some(now);
                action.status = ActionStatus::Running;
                Ok(action.clone())
            }
            None => Err(EngineError::NotFound("NO_READY_ACTION".to_string())),
        }
    }

    async fn action_mark_succeeded(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write();
        {
            let action = inner.actions.get_mut(&id).ok_or_else(|| not_found("action", id))?;
            action.status = ActionStatus::Succeeded;
            action.end_time = Some(now);
            action.owner = None;
        }
        release_all_locks_for(&mut inner, id);
        propagate_success(&mut inner.actions, id);
        Ok(())
    }

    async fn action_mark_failed(&self, id: Uuid, now: DateTime<Utc>, reason: &str) -> Result<()> {
        let mut inner = self.inner.write();
        {
            let action = inner.actions.get_mut(&id).ok_or_else(|| not_found("action", id))?;
            action.status = ActionStatus::Failed;
            action.status_reason = reason.to_string();
            action.end_time = Some(now);
            action.owner = None;
        }
        release_all_locks_for(&mut inner, id);
        cascade_failure(&mut inner.actions, id);
        Ok(())
    }

    async fn action_mark_cancelled(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write();
        {
            let action = inner.actions.get_mut(&id).ok_or_else(|| not_found("action", id))?;
            action.status = ActionStatus::Cancelled;
            action.end_time = Some(now);
            action.owner = None;
        }
        release_all_locks_for(&mut inner, id);
        cascade_failure(&mut inner.actions, id);
        Ok(())
    }

    async fn action_mark_suspended(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write();
        let action = inner.actions.get_mut(&id).ok_or_else(|| not_found("action", id))?;
        action.status = ActionStatus::Suspended;
        action.updated_at = Some(now);
        Ok(())
    }

    async fn action_mark_running(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write();
        let action = inner.actions.get_mut(&id).ok_or_else(|| not_found("action", id))?;
        action.status = ActionStatus::Running;
        action.updated_at = Some(now);
        Ok(())
    }

    async fn action_abandon(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write();
        let action = inner.actions.get_mut(&id).ok_or_else(|| not_found("action", id))?;
        action.owner = None;
        action.start_time = None;
        action.status = ActionStatus::Ready;
        Ok(())
    }

    async fn action_signal(&self, id: Uuid, cmd: ActionSignal) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.actions.contains_key(&id) {
            return Err(not_found("action", id));
        }
        inner.action_signals.insert(id, cmd);
        Ok(())
    }

    async fn action_signal_query(&self, id: Uuid) -> Result<Option<ActionSignal>> {
        Ok(self.inner.read().action_signals.get(&id).copied())
    }

    async fn action_add_dependency(&self, parent_ids: &[Uuid], child_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.actions.contains_key(&child_id) {
            return Err(not_found("action", child_id));
        }
        let mut any_non_terminal = false;
        for parent_id in parent_ids {
            let parent_terminal_success = inner
                .actions
                .get(parent_id)
                .map(|p| matches!(p.status, ActionStatus::Succeeded))
                .unwrap_or(false);
            if !parent_terminal_success {
                any_non_terminal = true;
            }
            if let Some(parent) = inner.actions.get_mut(parent_id) {
                parent.depended_by.insert(child_id);
            }
        }
        let unresolved: HashSet<Uuid> = parent_ids
            .iter()
            .copied()
            .filter(|p| {
                !inner
                    .actions
                    .get(p)
                    .map(|a| matches!(a.status, ActionStatus::Succeeded))
                    .unwrap_or(false)
            })
            .collect();
        let child = inner.actions.get_mut(&child_id).expect("checked above");
        child.depends_on.extend(unresolved);
        child.status = if any_non_terminal {
            ActionStatus::Waiting
        } else {
            ActionStatus::Ready
        };
        Ok(())
    }

    async fn action_get_depended(&self, id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .inner
            .read()
            .actions
            .get(&id)
            .map(|a| a.depends_on.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn action_get_dependents(&self, id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .inner
            .read()
            .actions
            .get(&id)
            .map(|a| a.depended_by.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn action_list_by_status(&self, status: ActionStatus) -> Result<Vec<Action>> {
        Ok(self
            .inner
            .read()
            .actions
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect())
    }

    async fn cluster_lock_acquire(
        &self,
        cluster_id: Uuid,
        action_id: Uuid,
        semantics: LockSemantics,
        now: DateTime<Utc>,
        lock_retention_s: u64,
    ) -> Result<LockOutcome> {
        let mut inner = self.inner.write();
        Ok(try_acquire(
            &mut inner.cluster_locks,
            cluster_id,
            action_id,
            semantics,
            now,
            lock_retention_s,
        ))
    }

    async fn cluster_lock_release(&self, cluster_id: Uuid, action_id: Uuid) -> Result<()> {
        release(&mut self.inner.write().cluster_locks, cluster_id, action_id);
        Ok(())
    }

    async fn node_lock_acquire(
        &self,
        node_id: Uuid,
        action_id: Uuid,
        now: DateTime<Utc>,
        lock_retention_s: u64,
    ) -> Result<LockOutcome> {
        let mut inner = self.inner.write();
        Ok(try_acquire(
            &mut inner.node_locks,
            node_id,
            action_id,
            LockSemantics::Exclusive,
            now,
            lock_retention_s,
        ))
    }

    async fn node_lock_release(&self, node_id: Uuid, action_id: Uuid) -> Result<()> {
        release(&mut self.inner.write().node_locks, node_id, action_id);
        Ok(())
    }

    async fn lock_holders(&self, scope: LockScope, resource_id: Uuid) -> Result<Vec<Uuid>> {
        let inner = self.inner.read();
        let table = match scope {
            LockScope::Cluster => &inner.cluster_locks,
            LockScope::Node => &inner.node_locks,
        };
        Ok(table.get(&resource_id).map(|h| h.action_ids.clone()).unwrap_or_default())
    }

    async fn health_registry_upsert(&self, entry: HealthRegistry) -> Result<Uuid> {
        let id = entry.id;
        let cluster_id = entry.cluster_id;
        self.inner.write().health_registry.insert(cluster_id, entry);
        Ok(id)
    }

    async fn health_registry_remove(&self, cluster_id: Uuid) -> Result<()> {
        self.inner.write().health_registry.remove(&cluster_id);
        Ok(())
    }

    async fn health_registry_get(&self, cluster_id: Uuid) -> Result<Option<HealthRegistry>> {
        Ok(self.inner.read().health_registry.get(&cluster_id).cloned())
    }

    async fn health_registry_claim(&self, engine_id: &str) -> Result<Vec<HealthRegistry>> {
        let mut inner = self.inner.write();
        let mut claimed = Vec::new();
        for entry in inner.health_registry.values_mut() {
            if entry.engine_id.is_none() {
                entry.engine_id = Some(engine_id.to_string());
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn health_registry_list(&self) -> Result<Vec<HealthRegistry>> {
        Ok(self.inner.read().health_registry.values().cloned().collect())
    }

    async fn event_append(&self, event: Event) -> Result<()> {
        event.emit();
        self.inner.write().events.push(event);
        Ok(())
    }

    async fn event_list_for(&self, obj_id: Uuid) -> Result<Vec<Event>> {
        Ok(self
            .inner
            .read()
            .events
            .iter()
            .filter(|e| e.obj_id == obj_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, ActionCause, Cluster};

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[tokio::test]
    async fn cluster_crud_round_trips() {
        let storage = MemoryStorage::new();
        let cluster = Cluster::new("web", Uuid::new_v4(), 2, 1, 4, 3600, now());
        let id = storage.cluster_create(cluster).await.unwrap();
        let fetched = storage.cluster_get(id).await.unwrap();
        assert_eq!(fetched.id, id);
        storage.cluster_delete(id).await.unwrap();
        assert!(storage.cluster_get(id).await.is_err());
    }

    #[tokio::test]
    async fn acquire_first_ready_claims_exactly_one() {
        let storage = MemoryStorage::new();
        let a = Action::new("create", Uuid::new_v4(), "NODE_CREATE", ActionCause::RpcRequest, 60, now());
        let id = storage.action_create(a).await.unwrap();
        let claimed = storage.action_acquire_first_ready("engine-1", now()).await.unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, ActionStatus::Running);
        assert!(storage.action_acquire_first_ready("engine-1", now()).await.is_err());
    }

    #[tokio::test]
    async fn dependency_promotes_child_on_parent_success() {
        let storage = MemoryStorage::new();
        let target = Uuid::new_v4();
        let parent = Action::new("create-node", target, "NODE_CREATE", ActionCause::DerivedAction, 60, now());
        let parent_id = storage.action_create(parent).await.unwrap();
        let child = Action::new("join", target, "NODE_JOIN", ActionCause::DerivedAction, 60, now());
        let child_id = storage.action_create(child).await.unwrap();

        storage.action_add_dependency(&[parent_id], child_id).await.unwrap();
        let child = storage.action_get(child_id).await.unwrap();
        assert_eq!(child.status, ActionStatus::Waiting);

        storage.action_acquire_first_ready("engine-1", now()).await.unwrap();
        storage.action_mark_succeeded(parent_id, now()).await.unwrap();
        let child = storage.action_get(child_id).await.unwrap();
        assert_eq!(child.status, ActionStatus::Ready);
        assert!(child.depends_on.is_empty());
    }

    #[tokio::test]
    async fn dependency_cascades_failure_to_dependents() {
        let storage = MemoryStorage::new();
        let target = Uuid::new_v4();
        let parent = Action::new("create-node", target, "NODE_CREATE", ActionCause::DerivedAction, 60, now());
        let parent_id = storage.action_create(parent).await.unwrap();
        let child = Action::new("join", target, "NODE_JOIN", ActionCause::DerivedAction, 60, now());
        let child_id = storage.action_create(child).await.unwrap();
        storage.action_add_dependency(&[parent_id], child_id).await.unwrap();

        storage.action_mark_failed(parent_id, now(), "driver error").await.unwrap();
        let child = storage.action_get(child_id).await.unwrap();
        assert_eq!(child.status, ActionStatus::Failed);
        assert!(child.status_reason.contains(&parent_id.to_string()));
    }

    #[tokio::test]
    async fn lock_contention_then_steal_on_stale() {
        let storage = MemoryStorage::new();
        let cluster_id = Uuid::new_v4();
        let a1 = Uuid::new_v4();
        let a2 = Uuid::new_v4();
        let t0 = now();

        let outcome = storage
            .cluster_lock_acquire(cluster_id, a1, LockSemantics::Exclusive, t0, 600)
            .await
            .unwrap();
        assert_eq!(outcome, LockOutcome::Acquired);

        let outcome = storage
            .cluster_lock_acquire(cluster_id, a2, LockSemantics::Exclusive, t0, 600)
            .await
            .unwrap();
        assert_eq!(outcome, LockOutcome::Contention);

        let later = t0 + chrono::Duration::seconds(601);
        let outcome = storage
            .cluster_lock_acquire(cluster_id, a2, LockSemantics::Exclusive, later, 600)
            .await
            .unwrap();
        assert_eq!(outcome, LockOutcome::Acquired);
    }

    #[tokio::test]
    async fn shared_locks_coexist() {
        let storage = MemoryStorage::new();
        let cluster_id = Uuid::new_v4();
        let a1 = Uuid::new_v4();
        let a2 = Uuid::new_v4();
        let t0 = now();
        storage
            .cluster_lock_acquire(cluster_id, a1, LockSemantics::Shared, t0, 600)
            .await
            .unwrap();
        let outcome = storage
            .cluster_lock_acquire(cluster_id, a2, LockSemantics::Shared, t0, 600)
            .await
            .unwrap();
        assert_eq!(outcome, LockOutcome::Acquired);
        let holders = storage.lock_holders(LockScope::Cluster, cluster_id).await.unwrap();
        assert_eq!(holders.len(), 2);
    }

    #[tokio::test]
    async fn health_registry_claim_assigns_unclaimed_only() {
        let storage = MemoryStorage::new();
        let cluster_id = Uuid::new_v4();
        let entry = HealthRegistry::new(cluster_id, crate::model::CheckType::NodeStatusPolling, 60);
        storage.health_registry_upsert(entry).await.unwrap();

        let claimed = storage.health_registry_claim("engine-a").await.unwrap();
        assert_eq!(claimed.len(), 1);
        let claimed_again = storage.health_registry_claim("engine-b").await.unwrap();
        assert!(claimed_again.is_empty());
    }
}
