//! Operator endpoints under `/auth`: reachability and runtime log level.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{err_code, AppState, BaseResponse};

#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    #[serde(flatten)]
    pub base: BaseResponse,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogLevelResponse {
    #[serde(flatten)]
    pub base: BaseResponse,
    pub level: String,
}

#[derive(Debug, Deserialize)]
struct SetLogLevelRequest {
    level: String,
}

pub async fn ping_handler() -> Json<PingResponse> {
    Json(PingResponse {
        base: BaseResponse::ok(),
        message: "pong".to_string(),
    })
}

pub async fn get_log_level_handler(State(state): State<AppState>) -> Json<LogLevelResponse> {
    Json(LogLevelResponse {
        base: BaseResponse::ok(),
        level: state.log_level.current(),
    })
}

/// Changes the level of every log target. Body: `{"level": "debug"}`.
pub async fn set_log_level_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> (StatusCode, Json<BaseResponse>) {
    let request: SetLogLevelRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(BaseResponse::bad_body(format!("Unmarshal err: {err}"))),
            )
        }
    };

    match state.log_level.set(&request.level) {
        Ok(()) => {
            info!(level = %state.log_level.current(), "log level changed");
            (StatusCode::OK, Json(BaseResponse::ok()))
        }
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(BaseResponse::error(err_code::GENERAL, err.to_string(), "")),
        ),
    }
}
