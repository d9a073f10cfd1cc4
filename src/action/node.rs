//! NODE_* action bodies (design notes §4.4): acquire the node lock, delegate
//! to the node's profile-type driver, translate driver failures, and write
//! the resulting node status.

use super::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::model::{Node, NodeStatus};
use crate::profile::RecoveryAction;
use uuid::Uuid;

pub async fn execute(ctx: &ExecutionContext, action_id: Uuid) -> Result<()> {
    let action = ctx.storage.action_get(action_id).await?;
    let node_id = action.target;
    ctx.locks.acquire_node(node_id, action_id, ctx.now()).await?;
    let result = run_verb(ctx, &action.action, &action.inputs, node_id).await;
    ctx.locks.release_node(node_id, action_id).await?;
    result
}

async fn run_verb(
    ctx: &ExecutionContext,
    verb: &str,
    inputs: &crate::model::DataMap,
    node_id: Uuid,
) -> Result<()> {
    match verb {
        "NODE_CREATE" => node_create(ctx, node_id, inputs).await,
        "NODE_DELETE" => node_delete(ctx, node_id).await,
        "NODE_JOIN" => node_join(ctx, node_id, inputs).await,
        "NODE_LEAVE" => node_leave(ctx, node_id).await,
        "NODE_UPDATE" => node_update(ctx, node_id, inputs).await,
        "NODE_CHECK" => node_check(ctx, node_id).await,
        "NODE_RECOVER" => node_recover(ctx, node_id, inputs).await,
        other => Err(EngineError::Validation(format!("unknown node verb {other}"))),
    }
}

async fn node_create(ctx: &ExecutionContext, node_id: Uuid, inputs: &crate::model::DataMap) -> Result<()> {
    let mut node = ctx.storage.node_get(node_id).await?;
    if let Some(placement) = inputs.get("placement") {
        node.data.insert("placement".to_string(), placement.clone());
    }
    let profile = ctx.storage.profile_get(node.profile_id).await?;
    let driver = ctx.profiles.get(&profile.r#type)?;
    node.set_status(NodeStatus::Creating, "creating", ctx.now());
    match driver.create(&profile, &node).await {
        Ok(physical_id) => {
            node.physical_id = Some(physical_id);
            node.set_status(NodeStatus::Active, "node created", ctx.now());
            ctx.storage.node_update(node).await
        }
        Err(e) => {
            node.set_status(NodeStatus::Error, e.to_string(), ctx.now());
            ctx.storage.node_update(node).await?;
            Err(e)
        }
    }
}

async fn node_delete(ctx: &ExecutionContext, node_id: Uuid) -> Result<()> {
    let node = ctx.storage.node_get(node_id).await?;
    let profile = ctx.storage.profile_get(node.profile_id).await?;
    let driver = ctx.profiles.get(&profile.r#type)?;
    driver.delete(&profile, &node).await?;
    ctx.storage.node_delete(node_id).await
}

async fn node_join(ctx: &ExecutionContext, node_id: Uuid, inputs: &crate::model::DataMap) -> Result<()> {
    let cluster_id: Uuid = inputs
        .get("cluster_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::Validation("NODE_JOIN requires inputs.cluster_id".to_string()))?;
    let index = inputs.get("index").and_then(|v| v.as_i64()).unwrap_or(-1);

    let mut node = ctx.storage.node_get(node_id).await?;
    if let Some(placement) = inputs.get("placement") {
        node.data.insert("placement".to_string(), placement.clone());
    }
    let profile = ctx.storage.profile_get(node.profile_id).await?;
    let driver = ctx.profiles.get(&profile.r#type)?;
    driver.join(&profile, &node, cluster_id).await?;
    node.cluster_id = Some(cluster_id);
    node.index = index;
    node.set_status(NodeStatus::Active, "joined cluster", ctx.now());
    ctx.storage.node_update(node).await
}

async fn node_leave(ctx: &ExecutionContext, node_id: Uuid) -> Result<()> {
    let mut node = ctx.storage.node_get(node_id).await?;
    let profile = ctx.storage.profile_get(node.profile_id).await?;
    let driver = ctx.profiles.get(&profile.r#type)?;
    driver.leave(&profile, &node).await?;
    node.cluster_id = None;
    node.index = -1;
    node.set_status(NodeStatus::Active, "left cluster", ctx.now());
    ctx.storage.node_update(node).await
}

async fn node_update(ctx: &ExecutionContext, node_id: Uuid, inputs: &crate::model::DataMap) -> Result<()> {
    let new_profile_id: Uuid = inputs
        .get("profile_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::Validation("NODE_UPDATE requires inputs.profile_id".to_string()))?;

    let mut node = ctx.storage.node_get(node_id).await?;
    let old_profile = ctx.storage.profile_get(node.profile_id).await?;
    let new_profile = ctx.storage.profile_get(new_profile_id).await?;
    let driver = ctx.profiles.get(&old_profile.r#type)?;
    node.set_status(NodeStatus::Updating, "updating", ctx.now());
    driver.update(&old_profile, &node, &new_profile).await?;
    node.profile_id = new_profile_id;
    node.set_status(NodeStatus::Active, "updated", ctx.now());
    ctx.storage.node_update(node).await
}

async fn node_check(ctx: &ExecutionContext, node_id: Uuid) -> Result<()> {
    let mut node: Node = ctx.storage.node_get(node_id).await?;
    let profile = ctx.storage.profile_get(node.profile_id).await?;
    let driver = ctx.profiles.get(&profile.r#type)?;
    let healthy = driver.check(&profile, &node).await?;
    if healthy {
        if !node.is_active() {
            node.set_status(NodeStatus::Active, "check passed", ctx.now());
            ctx.storage.node_update(node).await?;
        }
        Ok(())
    } else {
        node.set_status(NodeStatus::Error, "health check failed", ctx.now());
        ctx.storage.node_update(node).await?;
        Err(EngineError::DriverFailure(format!("node {node_id} failed health check")))
    }
}

async fn node_recover(ctx: &ExecutionContext, node_id: Uuid, inputs: &crate::model::DataMap) -> Result<()> {
    let recovery_action = match inputs.get("recovery_action").and_then(|v| v.as_str()) {
        Some("RECREATE") => RecoveryAction::Recreate,
        _ => RecoveryAction::Rebuild,
    };
    let mut node = ctx.storage.node_get(node_id).await?;
    let profile = ctx.storage.profile_get(node.profile_id).await?;
    let driver = ctx.profiles.get(&profile.r#type)?;
    node.set_status(NodeStatus::Recovering, "recovering", ctx.now());
    match driver.recover(&profile, &node, recovery_action).await {
        Ok(physical_id) => {
            node.physical_id = Some(physical_id);
            node.set_status(NodeStatus::Active, "recovered", ctx.now());
            ctx.storage.node_update(node).await
        }
        Err(e) => {
            node.set_status(NodeStatus::Error, e.to_string(), ctx.now());
            ctx.storage.node_update(node).await?;
            Err(e)
        }
    }
}
