//! REST request/response types and the `ApiError` wire format (design notes
//! §6). Strongly typed at the boundary; everything past this layer speaks
//! [`crate::model`] and [`crate::error::EngineError`] directly.

use crate::error::EngineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub listen_addr: String,
    pub request_timeout_secs: u64,
    pub max_body_size: usize,
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
            max_body_size: 1024 * 1024,
            enable_cors: true,
        }
    }
}

/// Structured error body returned for every non-2xx response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub timestamp: i64,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            timestamp: SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64,
        }
    }
}

/// Maps the engine's error taxonomy onto the REST status codes named in
/// the interface notes: `NOT_FOUND`->404, `VALIDATION_ERROR`->400,
/// `CONFLICT`->409, everything else->500.
impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let code = match &e {
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::PolicyCheckFailed(_) => "VALIDATION_ERROR",
            EngineError::LockContention(_) => "CONFLICT",
            EngineError::Cancelled(_) => "CONFLICT",
            _ => "INTERNAL_ERROR",
        };
        ApiError::new(code, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.code.as_str() {
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// An action was submitted; the caller should poll `/actions/{id}` for the
/// terminal outcome.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionAccepted {
    pub action_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateClusterRequest {
    pub name: String,
    pub profile_id: Uuid,
    #[serde(default)]
    pub desired_capacity: i64,
    #[serde(default)]
    pub min_size: i64,
    #[serde(default = "default_max_size")]
    pub max_size: i64,
    #[serde(default = "default_timeout")]
    pub timeout_s: u64,
}

fn default_max_size() -> i64 {
    -1
}

fn default_timeout() -> u64 {
    3600
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateClusterRequest {
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub inputs: crate::model::DataMap,
}

/// Body for `POST /clusters/{id}/actions`: `action` selects the verb, the
/// rest of the object is passed through as the action's `inputs`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ClusterActionRequest {
    pub action: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub params: crate::model::DataMap,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProfileRequest {
    pub name: String,
    pub r#type: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub spec: crate::model::DataMap,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePolicyRequest {
    pub name: String,
    pub r#type: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub spec: crate::model::DataMap,
    #[serde(default)]
    pub cooldown_s: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404_code() {
        let err: ApiError = EngineError::NotFound("cluster missing".to_string()).into();
        assert_eq!(err.code, "NOT_FOUND");
    }

    #[test]
    fn validation_maps_to_400_code() {
        let err: ApiError = EngineError::Validation("bad input".to_string()).into();
        assert_eq!(err.code, "VALIDATION_ERROR");
    }

    #[test]
    fn driver_failure_maps_to_internal() {
        let err: ApiError = EngineError::DriverFailure("boom".to_string()).into();
        assert_eq!(err.code, "INTERNAL_ERROR");
    }
}
