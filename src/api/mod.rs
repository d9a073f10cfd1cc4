//! External service entry points (§6 of the design notes).
//!
//! The hard engineering of this crate lives in the action/dispatcher/policy
//! kernel (see [`crate::action`], [`crate::dispatch`], [`crate::policy`]);
//! this module is a thin, shape-correct REST veneer that turns HTTP requests
//! into action records via [`crate::engine::EngineHandle`].

pub mod rest;

pub use rest::{ApiConfig, ApiError, ApiResult, RestApiServer};
