//! Network module with deferred startup lifecycle.
//!
//! `new()` wires the shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections until the shutdown future resolves. The
//! split lets the entry point learn the bound port before serving.

use std::future::Future;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use super::config::NetworkConfig;
use super::handlers::{
    get_log_level_handler, health_handler, liveness_handler, operation_routes, ping_handler,
    readiness_handler, set_log_level_handler, AppState,
};
use super::middleware::with_http_layers;

/// Owns the HTTP listener and router state.
pub struct NetworkModule {
    state: AppState,
    listener: Option<TcpListener>,
}

impl NetworkModule {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            listener: None,
        }
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /health`, `/health/live`, `/health/ready` -- probes
    /// - `POST /create-user`, `/delete-user` (and `/allocate-res`, `/free-res`) -- provisioning
    /// - `POST /auth/<operation>` -- file operations
    /// - `GET /auth/ping`, `GET|POST /auth/log-level` -- operator endpoints
    pub fn build_router(&self) -> Router {
        router(self.state.clone())
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which differs from the configured
    /// port when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let listener = TcpListener::bind(self.state.config.bind_addr()).await?;
        let port = listener.local_addr()?.port();

        info!(host = %self.state.config.host, port, "TCP listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until `shutdown` resolves, then waits for open
    /// requests to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called, or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Some(listener) = self.listener else {
            anyhow::bail!("start() must be called before serve()");
        };
        let router = router(self.state);

        info!("serving HTTP");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("HTTP server stopped");
        Ok(())
    }
}

fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/auth/ping", get(ping_handler))
        .route(
            "/auth/log-level",
            get(get_log_level_handler).post(set_log_level_handler),
        )
        .merge(operation_routes());

    with_http_layers(routes, &state.config).with_state(state)
}
