//! CLUSTER_* action state machines (design notes §4.4).
//!
//! Common shape: acquire the cluster lock, run the BEFORE policy pipeline,
//! fail fast on `CHECK_ERROR`, perform the verb body (scattering child
//! NODE_* actions and waiting on them), run the AFTER pipeline, then update
//! cluster status and release the lock. Child node actions are real `Action`
//! rows wired through `action_add_dependency` with no prerequisites — they
//! go `READY` immediately and are picked up by the same background
//! dispatcher and `Semaphore`-bounded worker pool as every other action, so
//! they get `action::run`'s timeout and cancel-signal handling for free. The
//! cluster action itself polls for each child's terminal status rather than
//! running it in-process, checkpointing on its own signal between polls so a
//! cancelled or timed-out parent relays `CANCEL` to children still in flight.

use super::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::model::{
    Action, ActionCause, ActionSignal, ActionStatus, Cluster, ClusterPolicyBinding, ClusterStatus, DataMap,
    LockSemantics, Node, NodeStatus,
};
use crate::policy::{policy_check, PolicyContext, PolicyWhen};
use std::time::Duration;
use uuid::Uuid;

pub async fn execute(ctx: &ExecutionContext, action_id: Uuid) -> Result<()> {
    let mut action = ctx.storage.action_get(action_id).await?;
    let cluster_id = action.target;
    let semantics = if action.action == "CLUSTER_CHECK" {
        LockSemantics::Shared
    } else {
        LockSemantics::Exclusive
    };
    ctx.locks.acquire_cluster(cluster_id, action_id, semantics, ctx.now()).await?;
    let result = run_verb(ctx, &mut action, cluster_id).await;
    ctx.locks.release_cluster(cluster_id, action_id).await?;
    result
}

fn policy_ctx(ctx: &ExecutionContext) -> PolicyContext {
    PolicyContext {
        storage: ctx.storage.clone(),
        health: ctx.health.clone(),
        now: ctx.now(),
    }
}

/// Checkpoints on `action_id`'s own signal/timeout between policy steps,
/// converting a pending CANCEL/SUSPEND-then-never-resumed/TIMEOUT into the
/// matching error so the verb body is never entered once the action has
/// been told to stop.
async fn checkpoint_or_stop(ctx: &ExecutionContext, action_id: Uuid) -> Result<()> {
    match super::checkpoint(ctx, action_id).await? {
        None => Ok(()),
        Some(crate::model::ActionResult::Timeout) => Err(EngineError::Timeout(format!("action {action_id} timed out"))),
        Some(_) => Err(EngineError::Cancelled(format!("action {action_id} was cancelled"))),
    }
}

async fn run_verb(ctx: &ExecutionContext, action: &mut Action, cluster_id: Uuid) -> Result<()> {
    let pctx = policy_ctx(ctx);
    policy_check(&ctx.policies, &pctx, cluster_id, PolicyWhen::Before, action).await?;
    if action.is_check_error() {
        return Err(EngineError::PolicyCheckFailed(
            action.check_reason().unwrap_or_default(),
        ));
    }
    checkpoint_or_stop(ctx, action.id).await?;

    let body_result = match action.action.as_str() {
        "CLUSTER_CREATE" => cluster_create(ctx, action.id, cluster_id, &action.data).await,
        "CLUSTER_DELETE" => cluster_delete(ctx, action.id, cluster_id).await,
        "CLUSTER_RESIZE" => cluster_resize(ctx, action.id, cluster_id, &action.inputs, &action.data).await,
        "CLUSTER_SCALE_OUT" => cluster_scale(ctx, action.id, cluster_id, &action.data, true).await,
        "CLUSTER_SCALE_IN" => cluster_scale(ctx, action.id, cluster_id, &action.data, false).await,
        "CLUSTER_ADD_NODES" => cluster_add_nodes(ctx, action.id, cluster_id, &action.inputs, &action.data).await,
        "CLUSTER_DEL_NODES" => cluster_del_nodes(ctx, action.id, cluster_id, &action.inputs, &action.data).await,
        "CLUSTER_CHECK" => cluster_check(ctx, action.id, cluster_id).await,
        "CLUSTER_RECOVER" => cluster_recover(ctx, action.id, cluster_id).await,
        "CLUSTER_UPDATE" => cluster_update(ctx, action.id, cluster_id, &action.inputs).await,
        "CLUSTER_ATTACH_POLICY" => cluster_attach_policy(ctx, cluster_id, &action.inputs).await,
        "CLUSTER_DETACH_POLICY" => cluster_detach_policy(ctx, cluster_id, &action.inputs).await,
        "CLUSTER_UPDATE_POLICY" => cluster_update_policy(ctx, cluster_id, &action.inputs).await,
        other => Err(EngineError::Validation(format!("unknown cluster verb {other}"))),
    };
    body_result?;

    checkpoint_or_stop(ctx, action.id).await?;
    policy_check(&ctx.policies, &pctx, cluster_id, PolicyWhen::After, action).await?;
    if action.is_check_error() {
        return Err(EngineError::PolicyCheckFailed(
            action.check_reason().unwrap_or_default(),
        ));
    }
    Ok(())
}

/// Creates a child NODE_* action with no dependencies, so it is `READY`
/// the moment `action_add_dependency` runs and picked up by the first free
/// dispatcher worker — never executed in-process by the cluster action.
async fn spawn_child(ctx: &ExecutionContext, target: Uuid, verb: &str, inputs: DataMap) -> Result<Uuid> {
    let mut action = Action::new(
        verb,
        target,
        verb,
        ActionCause::DerivedAction,
        ctx.config.default_action_timeout_s,
        ctx.now(),
    );
    action.inputs = inputs;
    let action_id = ctx.storage.action_create(action).await?;
    ctx.storage.action_add_dependency(&[], action_id).await?;
    Ok(action_id)
}

/// Polls `child_id` to a terminal status, checkpointing on `parent_id`'s own
/// signal/timeout between polls. A cancelled or timed-out parent relays
/// CANCEL to the child and returns `EngineError::Cancelled` rather than
/// waiting the child out.
async fn await_child(ctx: &ExecutionContext, parent_id: Uuid, child_id: Uuid) -> Result<bool> {
    loop {
        let child = ctx.storage.action_get(child_id).await?;
        if child.status.is_terminal() {
            return Ok(child.status == ActionStatus::Succeeded);
        }
        if let Some(outcome) = super::checkpoint(ctx, parent_id).await? {
            let _ = ctx.storage.action_signal(child_id, ActionSignal::Cancel).await;
            let reason = match outcome {
                crate::model::ActionResult::Timeout => "parent action timed out",
                _ => "parent action was cancelled",
            };
            return Err(EngineError::Cancelled(format!("{reason}: waiting on child {child_id}")));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Spawns one child node action and waits for it to reach a terminal
/// status, returning whether it succeeded.
async fn run_child(ctx: &ExecutionContext, parent_id: Uuid, target: Uuid, verb: &str, inputs: DataMap) -> Result<bool> {
    let child_id = spawn_child(ctx, target, verb, inputs).await?;
    await_child(ctx, parent_id, child_id).await
}

/// Folds a batch of `run_child` results into `(successes, total)`, except
/// that a parent-level cancellation anywhere in the batch takes priority
/// over per-child tallying and is propagated immediately.
fn tally(results: &[Result<bool>]) -> Result<(usize, usize)> {
    for r in results {
        if let Err(e @ EngineError::Cancelled(_)) = r {
            return Err(e.clone());
        }
    }
    let successes = results.iter().filter(|r| matches!(r, Ok(true))).count();
    Ok((successes, results.len()))
}

/// Extracts the per-node placement hints `PlacementPolicy::pre_op` wrote
/// into `action.data["placement"]["placements"]`, if any.
fn placements_from(data: &DataMap) -> Vec<serde_json::Map<String, serde_json::Value>> {
    data.get("placement")
        .and_then(|p| p.get("placements"))
        .and_then(|p| p.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_object().cloned()).collect())
        .unwrap_or_default()
}

fn node_inputs_with_placement(placements: &[serde_json::Map<String, serde_json::Value>], index: usize) -> DataMap {
    let mut inputs = DataMap::new();
    if let Some(p) = placements.get(index) {
        inputs.insert("placement".to_string(), serde_json::Value::Object(p.clone()));
    }
    inputs
}

fn aggregate_status(successes: usize, total: usize, min_size: i64) -> (ClusterStatus, &'static str) {
    if total == 0 || successes == total {
        (ClusterStatus::Active, "cluster operation completed")
    } else if (successes as i64) >= min_size {
        (ClusterStatus::Warning, "some member operations failed")
    } else {
        (ClusterStatus::Critical, "most member operations failed")
    }
}

async fn cluster_create(ctx: &ExecutionContext, parent_id: Uuid, cluster_id: Uuid, data: &DataMap) -> Result<()> {
    let mut cluster = ctx.storage.cluster_get(cluster_id).await?;
    if cluster.status != ClusterStatus::Init {
        return Err(EngineError::Conflict(format!("cluster {cluster_id} is not INIT")));
    }
    cluster.set_status(ClusterStatus::Creating, "creating", ctx.now());
    ctx.storage.cluster_update(cluster.clone()).await?;

    let placements = placements_from(data);
    let mut futures = Vec::new();
    for i in 0..cluster.desired_capacity {
        let index = cluster.take_next_index();
        let node = Node::new_member(
            format!("{}-{}", cluster.name, index),
            cluster.profile_id,
            cluster_id,
            index,
            ctx.now(),
        );
        let node_id = ctx.storage.node_create(node).await?;
        let inputs = node_inputs_with_placement(&placements, i as usize);
        futures.push(run_child(ctx, parent_id, node_id, "NODE_CREATE", inputs));
    }
    ctx.storage.cluster_update(cluster.clone()).await?;

    let results = futures::future::join_all(futures).await;
    let (successes, total) = tally(&results)?;
    finish_cluster(ctx, cluster, successes, total).await
}

async fn finish_cluster(ctx: &ExecutionContext, mut cluster: Cluster, successes: usize, total: usize) -> Result<()> {
    let (status, reason) = aggregate_status(successes, total, cluster.min_size);
    cluster.set_status(status, reason, ctx.now());
    ctx.storage.cluster_update(cluster).await?;
    if status == ClusterStatus::Critical {
        return Err(EngineError::DriverFailure(reason.to_string()));
    }
    Ok(())
}

async fn cluster_delete(ctx: &ExecutionContext, parent_id: Uuid, cluster_id: Uuid) -> Result<()> {
    let mut cluster = ctx.storage.cluster_get(cluster_id).await?;
    cluster.set_status(ClusterStatus::Deleting, "deleting", ctx.now());
    ctx.storage.cluster_update(cluster.clone()).await?;

    let members = ctx.storage.node_list_by_cluster(cluster_id).await?;
    let futures = members
        .iter()
        .map(|n| run_child(ctx, parent_id, n.id, "NODE_DELETE", DataMap::new()));
    let results = futures::future::join_all(futures).await;
    let (successes, total) = tally(&results)?;
    if successes < total {
        cluster.set_status(ClusterStatus::Error, "some members failed to delete", ctx.now());
        ctx.storage.cluster_update(cluster).await?;
        return Err(EngineError::DriverFailure("cluster delete left undeleted members".to_string()));
    }
    ctx.storage.cluster_delete(cluster_id).await
}

fn resize_target(adjustment_type: &str, number: f64, min_step: i64, current: i64) -> i64 {
    match adjustment_type {
        "EXACT_CAPACITY" => number as i64,
        "CHANGE_IN_PERCENTAGE" => {
            let magnitude = ((current as f64 * number.abs()) / 100.0).floor() as i64;
            let delta = magnitude.max(min_step);
            if number < 0.0 {
                current - delta
            } else {
                current + delta
            }
        }
        _ => current + number as i64,
    }
}

async fn cluster_resize(
    ctx: &ExecutionContext,
    parent_id: Uuid,
    cluster_id: Uuid,
    inputs: &DataMap,
    data: &DataMap,
) -> Result<()> {
    let mut cluster = ctx.storage.cluster_get(cluster_id).await?;
    let current = cluster.desired_capacity;

    let target = if let Some(count) = data.get("creation").and_then(|c| c.get("count")).and_then(|c| c.as_i64()) {
        current + count
    } else if let Some(count) = data.get("deletion").and_then(|c| c.get("count")).and_then(|c| c.as_i64()) {
        current - count
    } else {
        let adjustment_type = inputs.get("adjustment_type").and_then(|v| v.as_str()).unwrap_or("CHANGE_IN_CAPACITY");
        let number = inputs.get("number").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let min_step = inputs.get("min_step").and_then(|v| v.as_i64()).unwrap_or(1);
        resize_target(adjustment_type, number, min_step, current)
    };

    let strict = inputs.get("strict").and_then(|v| v.as_bool()).unwrap_or(false);
    let clamped = cluster.clamp_capacity(target);
    if clamped != target && strict {
        return Err(EngineError::Validation(
            "resize target violates min_size/max_size and strict=true".to_string(),
        ));
    }

    if let Some(min_size) = inputs.get("min_size").and_then(|v| v.as_i64()) {
        cluster.min_size = min_size;
    }
    if let Some(max_size) = inputs.get("max_size").and_then(|v| v.as_i64()) {
        cluster.max_size = max_size;
    }

    if clamped == current {
        cluster.desired_capacity = clamped;
        ctx.storage.cluster_update(cluster).await?;
        return Ok(());
    }

    cluster.set_status(ClusterStatus::Resizing, "resizing", ctx.now());
    ctx.storage.cluster_update(cluster.clone()).await?;

    let results = if clamped > current {
        let placements = placements_from(data);
        let mut futures = Vec::new();
        for i in 0..(clamped - current) {
            let index = cluster.take_next_index();
            let node = Node::new_member(
                format!("{}-{}", cluster.name, index),
                cluster.profile_id,
                cluster_id,
                index,
                ctx.now(),
            );
            let node_id = ctx.storage.node_create(node).await?;
            let node_inputs = node_inputs_with_placement(&placements, i as usize);
            futures.push(run_child(ctx, parent_id, node_id, "NODE_CREATE", node_inputs));
        }
        futures::future::join_all(futures).await
    } else {
        let victims = select_victims(ctx, cluster_id, (current - clamped) as usize).await?;
        let futures = victims
            .iter()
            .map(|n| run_child(ctx, parent_id, n.id, "NODE_DELETE", DataMap::new()));
        futures::future::join_all(futures).await
    };

    let (successes, total) = tally(&results)?;
    cluster.desired_capacity = clamped;
    finish_cluster(ctx, cluster, successes, total).await
}

async fn select_victims(ctx: &ExecutionContext, cluster_id: Uuid, count: usize) -> Result<Vec<Node>> {
    let mut members = ctx.storage.node_list_by_cluster(cluster_id).await?;
    members.sort_by_key(|n| n.created_at.unwrap_or(n.init_at));
    members.truncate(count);
    Ok(members)
}

async fn cluster_scale(ctx: &ExecutionContext, parent_id: Uuid, cluster_id: Uuid, data: &DataMap, out: bool) -> Result<()> {
    let key = if out { "creation" } else { "deletion" };
    let count = data.get(key).and_then(|c| c.get("count")).and_then(|c| c.as_i64()).unwrap_or(0);
    let mut synthetic_inputs = DataMap::new();
    synthetic_inputs.insert("adjustment_type".to_string(), serde_json::json!("CHANGE_IN_CAPACITY"));
    synthetic_inputs.insert(
        "number".to_string(),
        serde_json::json!(if out { count } else { -count }),
    );
    cluster_resize(ctx, parent_id, cluster_id, &synthetic_inputs, data).await
}

async fn cluster_add_nodes(
    ctx: &ExecutionContext,
    parent_id: Uuid,
    cluster_id: Uuid,
    inputs: &DataMap,
    data: &DataMap,
) -> Result<()> {
    let mut cluster = ctx.storage.cluster_get(cluster_id).await?;
    let node_ids: Vec<Uuid> = inputs
        .get("node_ids")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).filter_map(|s| s.parse().ok()).collect())
        .unwrap_or_default();

    let placements = placements_from(data);
    let mut futures = Vec::new();
    let mut placement_index = 0usize;
    for node_id in &node_ids {
        let node = ctx.storage.node_get(*node_id).await?;
        if node.cluster_id.is_some() {
            continue;
        }
        let node_profile = ctx.storage.profile_get(node.profile_id).await?;
        let cluster_profile = ctx.storage.profile_get(cluster.profile_id).await?;
        if node_profile.r#type != cluster_profile.r#type {
            continue;
        }
        let index = cluster.take_next_index();
        let mut join_inputs = node_inputs_with_placement(&placements, placement_index);
        placement_index += 1;
        join_inputs.insert("cluster_id".to_string(), serde_json::json!(cluster_id.to_string()));
        join_inputs.insert("index".to_string(), serde_json::json!(index));
        futures.push(run_child(ctx, parent_id, *node_id, "NODE_JOIN", join_inputs));
    }
    let results = futures::future::join_all(futures).await;
    let (successes, total) = tally(&results)?;
    cluster.desired_capacity += successes as i64;
    finish_cluster(ctx, cluster, successes, total).await
}

async fn cluster_del_nodes(
    ctx: &ExecutionContext,
    parent_id: Uuid,
    cluster_id: Uuid,
    inputs: &DataMap,
    data: &DataMap,
) -> Result<()> {
    let mut cluster = ctx.storage.cluster_get(cluster_id).await?;
    let node_ids: Vec<Uuid> = inputs
        .get("node_ids")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).filter_map(|s| s.parse().ok()).collect())
        .unwrap_or_default();
    let destroy = data
        .get("deletion")
        .and_then(|d| d.get("destroy_after_deletion"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let verb = if destroy { "NODE_DELETE" } else { "NODE_LEAVE" };

    let futures = node_ids
        .iter()
        .map(|id| run_child(ctx, parent_id, *id, verb, DataMap::new()));
    let results = futures::future::join_all(futures).await;
    let (successes, total) = tally(&results)?;
    cluster.desired_capacity -= successes as i64;
    finish_cluster(ctx, cluster, successes, total).await
}

async fn cluster_check(ctx: &ExecutionContext, parent_id: Uuid, cluster_id: Uuid) -> Result<()> {
    let members = ctx.storage.node_list_by_cluster(cluster_id).await?;
    let futures = members
        .iter()
        .map(|n| run_child(ctx, parent_id, n.id, "NODE_CHECK", DataMap::new()));
    let results = futures::future::join_all(futures).await;
    tally(&results)?;
    aggregate_member_health(ctx, cluster_id).await
}

async fn cluster_recover(ctx: &ExecutionContext, parent_id: Uuid, cluster_id: Uuid) -> Result<()> {
    let members = ctx.storage.node_list_by_cluster(cluster_id).await?;
    let futures = members
        .iter()
        .filter(|n| n.status == NodeStatus::Error)
        .map(|n| run_child(ctx, parent_id, n.id, "NODE_RECOVER", DataMap::new()));
    let results = futures::future::join_all(futures).await;
    tally(&results)?;
    aggregate_member_health(ctx, cluster_id).await
}

async fn aggregate_member_health(ctx: &ExecutionContext, cluster_id: Uuid) -> Result<()> {
    let mut cluster = ctx.storage.cluster_get(cluster_id).await?;
    let members = ctx.storage.node_list_by_cluster(cluster_id).await?;
    let active = members.iter().filter(|n| n.is_active()).count();
    let (status, reason) = if active == members.len() {
        (ClusterStatus::Active, "all members healthy")
    } else if (active as i64) >= cluster.min_size {
        (ClusterStatus::Warning, "some members unhealthy")
    } else {
        (ClusterStatus::Critical, "fewer than min_size members healthy")
    };
    cluster.set_status(status, reason, ctx.now());
    ctx.storage.cluster_update(cluster).await
}

async fn cluster_update(ctx: &ExecutionContext, parent_id: Uuid, cluster_id: Uuid, inputs: &DataMap) -> Result<()> {
    let mut cluster = ctx.storage.cluster_get(cluster_id).await?;
    let new_profile_id: Option<Uuid> = inputs
        .get("profile_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok());

    if let Some(name) = inputs.get("name").and_then(|v| v.as_str()) {
        cluster.name = name.to_string();
    }

    let Some(new_profile_id) = new_profile_id else {
        ctx.storage.cluster_update(cluster).await?;
        return Ok(());
    };
    if new_profile_id == cluster.profile_id {
        ctx.storage.cluster_update(cluster).await?;
        return Ok(());
    }

    let old_profile = ctx.storage.profile_get(cluster.profile_id).await?;
    let new_profile = ctx.storage.profile_get(new_profile_id).await?;
    if old_profile.r#type != new_profile.r#type {
        return Err(EngineError::Validation(
            "CLUSTER_UPDATE profile must keep the same profile type".to_string(),
        ));
    }

    cluster.set_status(ClusterStatus::Updating, "updating", ctx.now());
    ctx.storage.cluster_update(cluster.clone()).await?;

    let members = ctx.storage.node_list_by_cluster(cluster_id).await?;
    let batch_size = ctx.config.max_update_parallel.max(1);
    let mut successes = 0usize;
    for batch in members.chunks(batch_size) {
        let futures = batch.iter().map(|n| {
            let mut update_inputs = DataMap::new();
            update_inputs.insert("profile_id".to_string(), serde_json::json!(new_profile_id.to_string()));
            run_child(ctx, parent_id, n.id, "NODE_UPDATE", update_inputs)
        });
        let results = futures::future::join_all(futures).await;
        let (batch_successes, _) = tally(&results)?;
        successes += batch_successes;
    }
    cluster.profile_id = new_profile_id;
    finish_cluster(ctx, cluster, successes, members.len()).await
}

async fn cluster_attach_policy(ctx: &ExecutionContext, cluster_id: Uuid, inputs: &DataMap) -> Result<()> {
    let policy_id: Uuid = inputs
        .get("policy_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::Validation("ATTACH_POLICY requires inputs.policy_id".to_string()))?;
    let policy = ctx.storage.policy_get(policy_id).await?;
    let ptype = ctx.policies.get(&policy.r#type);

    let singleton = ptype.as_ref().map(|t| t.singleton()).unwrap_or(true);
    if singleton {
        if let Some(existing) = ctx
            .storage
            .cluster_policy_list(cluster_id)
            .await?
            .into_iter()
            .find(|b| b.policy_id != policy_id)
        {
            let existing_policy = ctx.storage.policy_get(existing.policy_id).await?;
            if existing_policy.r#type == policy.r#type {
                return Err(EngineError::Conflict(format!(
                    "Only one instance of policy type ({}) can be attached to a cluster, but another instance ({}) is found attached to the cluster ({cluster_id}) already.",
                    policy.r#type, existing.policy_id
                )));
            }
        }
    }

    let pctx = policy_ctx(ctx);
    if let Some(ptype) = &ptype {
        let accepted = ptype.attach(cluster_id, &serde_json::Value::Object(policy.spec.clone()), &pctx).await?;
        if !accepted {
            return Err(EngineError::PolicyCheckFailed(format!("policy {policy_id} refused attach")));
        }
    }

    let priority = inputs
        .get("priority")
        .and_then(|v| v.as_i64())
        .unwrap_or_else(|| ptype.map(|t| t.priority() as i64).unwrap_or(policy.level as i64)) as i32;
    let binding = ClusterPolicyBinding::new(cluster_id, policy_id, priority);
    ctx.storage.cluster_policy_attach(binding).await
}

async fn cluster_detach_policy(ctx: &ExecutionContext, cluster_id: Uuid, inputs: &DataMap) -> Result<()> {
    let policy_id: Uuid = inputs
        .get("policy_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::Validation("DETACH_POLICY requires inputs.policy_id".to_string()))?;
    let policy = ctx.storage.policy_get(policy_id).await?;
    let pctx = policy_ctx(ctx);
    if let Some(ptype) = ctx.policies.get(&policy.r#type) {
        ptype.detach(cluster_id, &pctx).await?;
    }
    ctx.storage.cluster_policy_detach(cluster_id, policy_id).await
}

async fn cluster_update_policy(ctx: &ExecutionContext, cluster_id: Uuid, inputs: &DataMap) -> Result<()> {
    let policy_id: Uuid = inputs
        .get("policy_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::Validation("UPDATE_POLICY requires inputs.policy_id".to_string()))?;
    let mut bindings = ctx.storage.cluster_policy_list(cluster_id).await?;
    let binding = bindings
        .iter_mut()
        .find(|b| b.policy_id == policy_id)
        .ok_or_else(|| EngineError::NotFound(format!("policy {policy_id} not attached to cluster {cluster_id}")))?;
    if let Some(enabled) = inputs.get("enabled").and_then(|v| v.as_bool()) {
        binding.enabled = enabled;
    }
    if let Some(priority) = inputs.get("priority").and_then(|v| v.as_i64()) {
        binding.priority = priority as i32;
    }
    ctx.storage.cluster_policy_update(binding.clone()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::dispatch::Dispatcher;
    use crate::lock::LockManager;
    use crate::model::Profile;
    use crate::policy::health::NoopHealthControl;
    use crate::policy::PolicyRegistry;
    use crate::profile::{NullDriver, ProfileRegistry};
    use crate::storage::MemoryStorage;
    use chrono::Utc;
    use std::sync::Arc;

    fn test_ctx() -> ExecutionContext {
        let storage: Arc<dyn crate::storage::StorageAdapter> = Arc::new(MemoryStorage::new());
        let locks = Arc::new(LockManager::new(storage.clone(), 600));
        let mut profiles = ProfileRegistry::new();
        profiles.register(Arc::new(NullDriver::new("os.nova.server")));
        ExecutionContext {
            storage,
            locks,
            profiles: Arc::new(profiles),
            policies: Arc::new(PolicyRegistry::new()),
            health: Arc::new(NoopHealthControl),
            config: Arc::new(crate::config::Config::default()),
            clock: Arc::new(FakeClock::new(Utc::now())),
        }
    }

    /// Cluster action bodies now depend on a live dispatcher to carry their
    /// children to completion, so this round trip spins one up for the
    /// duration of the test rather than calling `run_verb` with nothing
    /// polling the ready queue on the other end.
    #[tokio::test]
    async fn create_resize_delete_round_trip() {
        let ctx = test_ctx();
        let profile = Profile::new("web-profile", "os.nova.server", DataMap::new(), ctx.now());
        let profile_id = ctx.storage.profile_create(profile).await.unwrap();

        let cluster = Cluster::new("web", profile_id, 2, 1, 4, 3600, ctx.now());
        let cluster_id = ctx.storage.cluster_create(cluster).await.unwrap();

        let dispatcher = Arc::new(Dispatcher::new(ctx.clone(), "engine-test", 4, Duration::from_millis(5)));
        let handle = dispatcher.clone().spawn();

        let mut action = Action::new(
            "create",
            cluster_id,
            "CLUSTER_CREATE",
            ActionCause::RpcRequest,
            3600,
            ctx.now(),
        );
        run_verb(&ctx, &mut action, cluster_id).await.unwrap();

        let cluster = ctx.storage.cluster_get(cluster_id).await.unwrap();
        assert_eq!(cluster.status, ClusterStatus::Active);
        let members = ctx.storage.node_list_by_cluster(cluster_id).await.unwrap();
        assert_eq!(members.len(), 2);

        let mut resize_action = Action::new(
            "resize",
            cluster_id,
            "CLUSTER_RESIZE",
            ActionCause::RpcRequest,
            3600,
            ctx.now(),
        );
        resize_action.inputs.insert("adjustment_type".to_string(), serde_json::json!("EXACT_CAPACITY"));
        resize_action.inputs.insert("number".to_string(), serde_json::json!(3));
        run_verb(&ctx, &mut resize_action, cluster_id).await.unwrap();
        let cluster = ctx.storage.cluster_get(cluster_id).await.unwrap();
        assert_eq!(cluster.desired_capacity, 3);
        let members = ctx.storage.node_list_by_cluster(cluster_id).await.unwrap();
        assert_eq!(members.len(), 3);

        let mut delete_action = Action::new(
            "delete",
            cluster_id,
            "CLUSTER_DELETE",
            ActionCause::RpcRequest,
            3600,
            ctx.now(),
        );
        run_verb(&ctx, &mut delete_action, cluster_id).await.unwrap();
        assert!(ctx.storage.cluster_get(cluster_id).await.is_err());
        let members = ctx.storage.node_list_by_cluster(cluster_id).await.unwrap();
        assert!(members.is_empty());

        dispatcher.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn attach_policy_rejects_second_singleton_of_same_type() {
        let ctx = test_ctx();
        let profile = Profile::new("p", "os.nova.server", DataMap::new(), ctx.now());
        let profile_id = ctx.storage.profile_create(profile).await.unwrap();
        let cluster = Cluster::new("web", profile_id, 1, 1, 2, 3600, ctx.now());
        let cluster_id = ctx.storage.cluster_create(cluster).await.unwrap();

        let policy_a = crate::model::Policy::new("scale-out-a", "senlin.policy.scaling_out", DataMap::new(), 0, ctx.now());
        let policy_a_id = policy_a.id;
        ctx.storage.policy_create(policy_a).await.unwrap();
        let policy_b = crate::model::Policy::new("scale-out-b", "senlin.policy.scaling_out", DataMap::new(), 0, ctx.now());
        let policy_b_id = policy_b.id;
        ctx.storage.policy_create(policy_b).await.unwrap();

        let mut inputs_a = DataMap::new();
        inputs_a.insert("policy_id".to_string(), serde_json::json!(policy_a_id.to_string()));
        cluster_attach_policy(&ctx, cluster_id, &inputs_a).await.unwrap();

        let mut inputs_b = DataMap::new();
        inputs_b.insert("policy_id".to_string(), serde_json::json!(policy_b_id.to_string()));
        let err = cluster_attach_policy(&ctx, cluster_id, &inputs_b).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn attach_policy_allows_two_non_singleton_bindings() {
        let ctx_storage: Arc<dyn crate::storage::StorageAdapter> = Arc::new(MemoryStorage::new());
        let locks = Arc::new(LockManager::new(ctx_storage.clone(), 600));
        let mut profiles = ProfileRegistry::new();
        profiles.register(Arc::new(NullDriver::new("os.nova.server")));
        let mut registry = PolicyRegistry::new();
        registry.register(Arc::new(crate::policy::LoadBalancePolicy::new()));
        let ctx = ExecutionContext {
            storage: ctx_storage,
            locks,
            profiles: Arc::new(profiles),
            policies: Arc::new(registry),
            health: Arc::new(NoopHealthControl),
            config: Arc::new(crate::config::Config::default()),
            clock: Arc::new(FakeClock::new(Utc::now())),
        };
        let profile = Profile::new("p", "os.nova.server", DataMap::new(), ctx.now());
        let profile_id = ctx.storage.profile_create(profile).await.unwrap();
        let cluster = Cluster::new("web", profile_id, 1, 1, 2, 3600, ctx.now());
        let cluster_id = ctx.storage.cluster_create(cluster).await.unwrap();

        let policy_a = crate::model::Policy::new("lb-a", "senlin.policy.loadbalance", DataMap::new(), 0, ctx.now());
        let policy_a_id = policy_a.id;
        ctx.storage.policy_create(policy_a).await.unwrap();
        let policy_b = crate::model::Policy::new("lb-b", "senlin.policy.loadbalance", DataMap::new(), 0, ctx.now());
        let policy_b_id = policy_b.id;
        ctx.storage.policy_create(policy_b).await.unwrap();

        let mut inputs_a = DataMap::new();
        inputs_a.insert("policy_id".to_string(), serde_json::json!(policy_a_id.to_string()));
        cluster_attach_policy(&ctx, cluster_id, &inputs_a).await.unwrap();

        let mut inputs_b = DataMap::new();
        inputs_b.insert("policy_id".to_string(), serde_json::json!(policy_b_id.to_string()));
        cluster_attach_policy(&ctx, cluster_id, &inputs_b).await.unwrap();

        let bindings = ctx.storage.cluster_policy_list(cluster_id).await.unwrap();
        assert_eq!(bindings.len(), 2);
    }

    #[tokio::test]
    async fn attach_policy_defaults_priority_to_declared_policy_type_priority() {
        let ctx_storage: Arc<dyn crate::storage::StorageAdapter> = Arc::new(MemoryStorage::new());
        let locks = Arc::new(LockManager::new(ctx_storage.clone(), 600));
        let mut profiles = ProfileRegistry::new();
        profiles.register(Arc::new(NullDriver::new("os.nova.server")));
        let mut registry = PolicyRegistry::new();
        registry.register(Arc::new(crate::policy::health::HealthPolicy::new()));
        let ctx = ExecutionContext {
            storage: ctx_storage,
            locks,
            profiles: Arc::new(profiles),
            policies: Arc::new(registry),
            health: Arc::new(NoopHealthControl),
            config: Arc::new(crate::config::Config::default()),
            clock: Arc::new(FakeClock::new(Utc::now())),
        };
        let profile = Profile::new("p", "os.nova.server", DataMap::new(), ctx.now());
        let profile_id = ctx.storage.profile_create(profile).await.unwrap();
        let cluster = Cluster::new("web", profile_id, 1, 1, 2, 3600, ctx.now());
        let cluster_id = ctx.storage.cluster_create(cluster).await.unwrap();

        let policy = crate::model::Policy::new("health", "senlin.policy.health", DataMap::new(), 0, ctx.now());
        let policy_id = policy.id;
        ctx.storage.policy_create(policy).await.unwrap();

        let mut inputs = DataMap::new();
        inputs.insert("policy_id".to_string(), serde_json::json!(policy_id.to_string()));
        cluster_attach_policy(&ctx, cluster_id, &inputs).await.unwrap();

        let bindings = ctx.storage.cluster_policy_list(cluster_id).await.unwrap();
        assert_eq!(bindings[0].priority, 600);
    }
}
