//! Persistence for the engine's core records (design notes §4.1).
//!
//! `StorageAdapter` is the narrow contract the runtime kernel needs — action
//! queue primitives, advisory locks, and plain CRUD for the rest of the data
//! model — not a general-purpose ORM. [`memory::MemoryStorage`] is the one
//! shipped implementation; it doubles as the engine's default backend and as
//! the deterministic test double.

pub mod memory;

pub use memory::MemoryStorage;

use crate::error::Result;
use crate::model::{
    Action, ActionSignal, ActionStatus, Cluster, ClusterPolicyBinding, Event, HealthRegistry, LockScope,
    LockSemantics, Node, Policy, Profile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Outcome of a lock acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    AlreadyHeldBySelf,
    Contention,
}

/// The minimum persistence surface the runtime kernel needs.
///
/// Implementations must make `action_acquire_first_ready`, the lock
/// primitives, and the terminal-status transitions atomic with respect to
/// each other; everything else is plain CRUD.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    // -- clusters --------------------------------------------------------
    async fn cluster_create(&self, cluster: Cluster) -> Result<Uuid>;
    async fn cluster_get(&self, id: Uuid) -> Result<Cluster>;
    async fn cluster_update(&self, cluster: Cluster) -> Result<()>;
    async fn cluster_delete(&self, id: Uuid) -> Result<()>;
    async fn cluster_list(&self) -> Result<Vec<Cluster>>;

    // -- nodes -------------------------------------------------------------
    async fn node_create(&self, node: Node) -> Result<Uuid>;
    async fn node_get(&self, id: Uuid) -> Result<Node>;
    async fn node_update(&self, node: Node) -> Result<()>;
    async fn node_delete(&self, id: Uuid) -> Result<()>;
    async fn node_list_by_cluster(&self, cluster_id: Uuid) -> Result<Vec<Node>>;

    // -- profiles ------------------------------------------------------------
    async fn profile_create(&self, profile: Profile) -> Result<Uuid>;
    async fn profile_get(&self, id: Uuid) -> Result<Profile>;
    async fn profile_list(&self) -> Result<Vec<Profile>>;

    // -- policies & bindings ------------------------------------------------
    async fn policy_create(&self, policy: Policy) -> Result<Uuid>;
    async fn policy_get(&self, id: Uuid) -> Result<Policy>;
    async fn policy_list(&self) -> Result<Vec<Policy>>;
    async fn cluster_policy_attach(&self, binding: ClusterPolicyBinding) -> Result<()>;
    async fn cluster_policy_detach(&self, cluster_id: Uuid, policy_id: Uuid) -> Result<()>;
    async fn cluster_policy_update(&self, binding: ClusterPolicyBinding) -> Result<()>;
    /// Enabled bindings for `cluster_id`, ascending by `priority`.
    async fn cluster_policy_list(&self, cluster_id: Uuid) -> Result<Vec<ClusterPolicyBinding>>;

    // -- actions -------------------------------------------------------------
    async fn action_create(&self, action: Action) -> Result<Uuid>;
    async fn action_get(&self, id: Uuid) -> Result<Action>;
    /// Atomically claims any `READY` action with no unresolved dependency,
    /// setting `owner`, `start_time=now`, `status=RUNNING`.
    async fn action_acquire_first_ready(&self, owner: &str, now: DateTime<Utc>) -> Result<Action>;
    async fn action_mark_succeeded(&self, id: Uuid, now: DateTime<Utc>) -> Result<()>;
    async fn action_mark_failed(&self, id: Uuid, now: DateTime<Utc>, reason: &str) -> Result<()>;
    async fn action_mark_cancelled(&self, id: Uuid, now: DateTime<Utc>) -> Result<()>;
    /// Cooperative-yield transition: `RUNNING -> SUSPENDED` on a pending
    /// `SUSPEND` signal. Leaves `owner`/`start_time` untouched.
    async fn action_mark_suspended(&self, id: Uuid, now: DateTime<Utc>) -> Result<()>;
    /// Cooperative-yield transition: `SUSPENDED -> RUNNING` on `RESUME`.
    async fn action_mark_running(&self, id: Uuid, now: DateTime<Utc>) -> Result<()>;
    /// Clears `owner`, resets to `READY` for a retry.
    async fn action_abandon(&self, id: Uuid) -> Result<()>;
    async fn action_signal(&self, id: Uuid, cmd: ActionSignal) -> Result<()>;
    async fn action_signal_query(&self, id: Uuid) -> Result<Option<ActionSignal>>;
    /// Wires `child_id` to depend on every id in `parent_ids`, demoting it to
    /// `WAITING` if any parent is non-terminal.
    async fn action_add_dependency(&self, parent_ids: &[Uuid], child_id: Uuid) -> Result<()>;
    async fn action_get_depended(&self, id: Uuid) -> Result<Vec<Uuid>>;
    async fn action_get_dependents(&self, id: Uuid) -> Result<Vec<Uuid>>;
    async fn action_list_by_status(&self, status: ActionStatus) -> Result<Vec<Action>>;

    // -- locks ----------------------------------------------------------------
    async fn cluster_lock_acquire(
        &self,
        cluster_id: Uuid,
        action_id: Uuid,
        semantics: LockSemantics,
        now: DateTime<Utc>,
        lock_retention_s: u64,
    ) -> Result<LockOutcome>;
    async fn cluster_lock_release(&self, cluster_id: Uuid, action_id: Uuid) -> Result<()>;
    async fn node_lock_acquire(
        &self,
        node_id: Uuid,
        action_id: Uuid,
        now: DateTime<Utc>,
        lock_retention_s: u64,
    ) -> Result<LockOutcome>;
    async fn node_lock_release(&self, node_id: Uuid, action_id: Uuid) -> Result<()>;
    /// Lock holders, for diagnostics and tests. `scope` selects the keyspace.
    async fn lock_holders(&self, scope: LockScope, resource_id: Uuid) -> Result<Vec<Uuid>>;

    // -- health registry ---------------------------------------------------
    async fn health_registry_upsert(&self, entry: HealthRegistry) -> Result<Uuid>;
    async fn health_registry_remove(&self, cluster_id: Uuid) -> Result<()>;
    async fn health_registry_get(&self, cluster_id: Uuid) -> Result<Option<HealthRegistry>>;
    /// Assigns unclaimed rows (`engine_id` is `None`) to `engine_id`.
    async fn health_registry_claim(&self, engine_id: &str) -> Result<Vec<HealthRegistry>>;
    async fn health_registry_list(&self) -> Result<Vec<HealthRegistry>>;

    // -- events -----------------------------------------------------------------
    async fn event_append(&self, event: Event) -> Result<()>;
    async fn event_list_for(&self, obj_id: Uuid) -> Result<Vec<Event>>;
}
