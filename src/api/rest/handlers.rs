//! Route handlers: thin translation from HTTP to [`EngineHandle`] calls and
//! back (design notes §6). Mutating endpoints return `202 Accepted` with a
//! `Location: /actions/{id}` header, per the interface notes' async-action
//! convention; reads return the stored record directly.

use super::types::{
    ActionAccepted, ApiResult, ClusterActionRequest, CreateClusterRequest, CreatePolicyRequest, CreateProfileRequest,
    UpdateClusterRequest,
};
use crate::engine::EngineHandle;
use crate::model::{Action, Cluster, ClusterPolicyBinding, Event, Node, Policy, Profile};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

type Engine = State<Arc<EngineHandle>>;

fn accepted(action_id: Uuid) -> (StatusCode, HeaderMap, Json<ActionAccepted>) {
    let mut headers = HeaderMap::new();
    headers.insert(
        "location",
        HeaderValue::from_str(&format!("/actions/{action_id}")).expect("uuid is valid header value"),
    );
    (StatusCode::ACCEPTED, headers, Json(ActionAccepted { action_id }))
}

// -- clusters ---------------------------------------------------------------

pub async fn list_clusters(State(engine): Engine) -> ApiResult<Json<Vec<Cluster>>> {
    Ok(Json(engine.storage.cluster_list().await?))
}

pub async fn get_cluster(State(engine): Engine, Path(id): Path<Uuid>) -> ApiResult<Json<Cluster>> {
    Ok(Json(engine.storage.cluster_get(id).await?))
}

pub async fn create_cluster(
    State(engine): Engine,
    Json(req): Json<CreateClusterRequest>,
) -> ApiResult<(StatusCode, HeaderMap, Json<ActionAccepted>)> {
    let (_cluster_id, action_id) = engine
        .create_cluster(req.name, req.profile_id, req.desired_capacity, req.min_size, req.max_size, req.timeout_s)
        .await?;
    Ok(accepted(action_id))
}

pub async fn update_cluster(
    State(engine): Engine,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateClusterRequest>,
) -> ApiResult<(StatusCode, HeaderMap, Json<ActionAccepted>)> {
    let action_id = engine.update_cluster(id, req.inputs).await?;
    Ok(accepted(action_id))
}

pub async fn delete_cluster(
    State(engine): Engine,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, HeaderMap, Json<ActionAccepted>)> {
    let action_id = engine.delete_cluster(id).await?;
    Ok(accepted(action_id))
}

/// Dispatches the `action` field to the matching `EngineHandle` submission
/// method, per the interface notes' route table for
/// `POST /clusters/{id}/actions`.
pub async fn cluster_action(
    State(engine): Engine,
    Path(id): Path<Uuid>,
    Json(req): Json<ClusterActionRequest>,
) -> ApiResult<(StatusCode, HeaderMap, Json<ActionAccepted>)> {
    let action_id = match req.action.as_str() {
        "resize" => engine.resize_cluster(id, req.params).await?,
        "scale_out" => engine.scale_out_cluster(id, req.params).await?,
        "scale_in" => engine.scale_in_cluster(id, req.params).await?,
        "add_nodes" => engine.add_nodes(id, req.params).await?,
        "del_nodes" => engine.del_nodes(id, req.params).await?,
        "check" => engine.check_cluster(id).await?,
        "recover" => engine.recover_cluster(id).await?,
        "policy_attach" => {
            let policy_id = policy_id_param(&req.params)?;
            engine.attach_policy(id, policy_id).await?
        }
        "policy_detach" => {
            let policy_id = policy_id_param(&req.params)?;
            engine.detach_policy(id, policy_id).await?
        }
        "policy_update" => {
            let policy_id = policy_id_param(&req.params)?;
            let enabled = req.params.get("enabled").and_then(|v| v.as_bool());
            let priority = req.params.get("priority").and_then(|v| v.as_i64()).map(|v| v as i32);
            engine.update_policy(id, policy_id, enabled, priority).await?
        }
        other => {
            return Err(crate::error::EngineError::Validation(format!("unknown cluster action {other}")).into());
        }
    };
    Ok(accepted(action_id))
}

fn policy_id_param(params: &crate::model::DataMap) -> Result<Uuid, crate::error::EngineError> {
    params
        .get("policy_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| crate::error::EngineError::Validation("params.policy_id is required".to_string()))
}

// -- nodes --------------------------------------------------------------------

pub async fn list_nodes(State(engine): Engine, Path(cluster_id): Path<Uuid>) -> ApiResult<Json<Vec<Node>>> {
    Ok(Json(engine.storage.node_list_by_cluster(cluster_id).await?))
}

pub async fn get_node(State(engine): Engine, Path(id): Path<Uuid>) -> ApiResult<Json<Node>> {
    Ok(Json(engine.storage.node_get(id).await?))
}

// -- profiles -------------------------------------------------------------

pub async fn list_profiles(State(engine): Engine) -> ApiResult<Json<Vec<Profile>>> {
    Ok(Json(engine.storage.profile_list().await?))
}

pub async fn get_profile(State(engine): Engine, Path(id): Path<Uuid>) -> ApiResult<Json<Profile>> {
    Ok(Json(engine.storage.profile_get(id).await?))
}

pub async fn create_profile(
    State(engine): Engine,
    Json(req): Json<CreateProfileRequest>,
) -> ApiResult<(StatusCode, Json<Uuid>)> {
    let id = engine.create_profile(req.name, req.r#type, req.spec).await?;
    Ok((StatusCode::CREATED, Json(id)))
}

// -- policies -----------------------------------------------------------------

pub async fn list_policies(State(engine): Engine) -> ApiResult<Json<Vec<Policy>>> {
    Ok(Json(engine.storage.policy_list().await?))
}

pub async fn get_policy(State(engine): Engine, Path(id): Path<Uuid>) -> ApiResult<Json<Policy>> {
    Ok(Json(engine.storage.policy_get(id).await?))
}

pub async fn create_policy(
    State(engine): Engine,
    Json(req): Json<CreatePolicyRequest>,
) -> ApiResult<(StatusCode, Json<Uuid>)> {
    let id = engine.create_policy(req.name, req.r#type, req.spec, req.cooldown_s).await?;
    Ok((StatusCode::CREATED, Json(id)))
}

pub async fn list_cluster_policies(
    State(engine): Engine,
    Path(cluster_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ClusterPolicyBinding>>> {
    Ok(Json(engine.storage.cluster_policy_list(cluster_id).await?))
}

// -- actions --------------------------------------------------------------------

pub async fn get_action(State(engine): Engine, Path(id): Path<Uuid>) -> ApiResult<Json<Action>> {
    Ok(Json(engine.storage.action_get(id).await?))
}

// -- events ---------------------------------------------------------------------

pub async fn list_events(State(engine): Engine, Path(obj_id): Path<Uuid>) -> ApiResult<Json<Vec<Event>>> {
    Ok(Json(engine.storage.event_list_for(obj_id).await?))
}

pub async fn health_check() -> &'static str {
    "ok"
}
