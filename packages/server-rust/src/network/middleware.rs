//! Transport layers wrapped around every gateway route.
//!
//! From the outside in: request id assignment, tracing, CORS, the HTTP
//! deadline, and request id propagation onto the response. Authorization and
//! backpressure live in the dispatch engine, not here.

use std::time::Duration;

use axum::http::header::HeaderName;
use axum::http::{Method, StatusCode};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::config::NetworkConfig;

fn request_id_header() -> HeaderName {
    HeaderName::from_static("x-request-id")
}

/// Wraps `router` in the gateway's transport layers.
///
/// A request still running after `request_timeout` is answered with 408.
/// This deadline sits above the engine's own per-request timeout.
pub fn with_http_layers<S>(router: Router<S>, config: &NetworkConfig) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    // Router::layer wraps what is already there, so the last layer added is outermost.
    router
        .layer(PropagateRequestIdLayer::new(request_id_header()))
        .layer(deadline(config.request_timeout))
        .layer(cors(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id_header(), MakeRequestUuid))
}

fn deadline(timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout)
}

/// `"*"` anywhere in `origins` opens CORS to every origin; otherwise only the
/// listed origins that parse as header values are allowed.
fn cors(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|origin| origin.parse().ok()))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request};
    use axum::routing::get;
    use tower::ServiceExt;

    use super::*;

    fn app(request_timeout: Duration, cors_origins: &[&str]) -> Router {
        let config = NetworkConfig {
            request_timeout,
            cors_origins: cors_origins.iter().map(ToString::to_string).collect(),
            ..NetworkConfig::default()
        };
        let routes = Router::new()
            .route("/fast", get(|| async { "ok" }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    "late"
                }),
            );
        with_http_layers(routes, &config)
    }

    #[tokio::test]
    async fn response_carries_generated_request_id() {
        let response = app(Duration::from_secs(5), &["*"])
            .oneshot(Request::get("/fast").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn caller_request_id_is_echoed() {
        let response = app(Duration::from_secs(5), &["*"])
            .oneshot(
                Request::get("/fast")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()["x-request-id"], "req-42");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_request_times_out() {
        let response = app(Duration::from_millis(50), &["*"])
            .oneshot(Request::get("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn cors_allowlist_is_applied() {
        let response = app(Duration::from_secs(5), &["https://console.example.com"])
            .oneshot(
                Request::get("/fast")
                    .header(header::ORIGIN, "https://console.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://console.example.com"
        );
    }
}
