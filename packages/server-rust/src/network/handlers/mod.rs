//! HTTP handler definitions for the gateway.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors), the JSON envelope every endpoint answers with, and
//! re-exports all handler functions for building the router.

pub mod admin;
pub mod health;
pub mod operations;

pub use admin::{get_log_level_handler, ping_handler, set_log_level_handler};
pub use health::{health_handler, liveness_handler, readiness_handler};
pub use operations::operation_routes;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::NetworkConfig;
use crate::logging::LogLevelHandle;
use crate::service::{Manager, ShutdownController};

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// The dispatch engine requests are submitted to.
    pub manager: Arc<Manager>,
    /// Health state and in-flight tracking of the dispatch engine.
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    pub log_level: LogLevelHandle,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(manager: Arc<Manager>, config: NetworkConfig, log_level: LogLevelHandle) -> Self {
        Self {
            shutdown: manager.shutdown_controller(),
            manager,
            config: Arc::new(config),
            log_level,
            start_time: Instant::now(),
        }
    }
}

/// Numeric result codes carried in `err_code`.
pub mod err_code {
    pub const OK: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const BAD_BODY: i32 = 3;
    pub const TIMEOUT: i32 = 4;
    pub const DENIED: i32 = 5;
    pub const OPEN_FAIL: i32 = 6;
    pub const READ_FAIL: i32 = 7;
    pub const CREATE_FILE_FAIL: i32 = 8;
    pub const WRITE_FAIL: i32 = 9;
    pub const CREATE_USER_FAIL: i32 = 10;
    pub const DELETE_USER_FAIL: i32 = 11;
    pub const DELETE_FILE_FAIL: i32 = 12;
    pub const RENAME_FILE_FAIL: i32 = 13;
}

/// Result envelope shared by every JSON response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseResponse {
    pub err_code: i32,
    pub err_info: String,
    #[serde(default)]
    pub more_info: String,
}

impl BaseResponse {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            err_code: err_code::OK,
            err_info: "RESULT_OK".to_string(),
            more_info: String::new(),
        }
    }

    #[must_use]
    pub fn error(code: i32, info: impl Into<String>, more: impl Into<String>) -> Self {
        Self {
            err_code: code,
            err_info: info.into(),
            more_info: more.into(),
        }
    }

    /// The request body could not be decoded or lacked a required field.
    #[must_use]
    pub fn bad_body(more: impl Into<String>) -> Self {
        Self::error(err_code::BAD_BODY, "FailedToParseBody", more)
    }
}
