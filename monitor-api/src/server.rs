use crate::{handlers, state::AppState, websocket};
use axum::{routing::get, Router};
use monitor_core::{ApiConfig, MonitorError, Result};
use std::future::Future;
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/status", get(handlers::get_status))
        .route("/api/v1/alerts", get(handlers::get_alerts))
        .route("/api/v1/data", get(handlers::get_current_data))
        .route("/api/v1/data/:symbol", get(handlers::get_symbol_data))
        .route("/ws", get(websocket::websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub struct ApiServer {
    app: Router,
    addr: SocketAddr,
}

impl ApiServer {
    pub fn new(config: &ApiConfig, state: AppState) -> Result<Self> {
        let addr = config.bind_address.parse::<SocketAddr>().map_err(|e| {
            MonitorError::Configuration(format!(
                "Invalid bind address {}: {}",
                config.bind_address, e
            ))
        })?;

        Ok(Self {
            app: router(state),
            addr,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("API server listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| MonitorError::Other(e.to_string()))?;

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| MonitorError::Other(e.to_string()))?;

        info!("API server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_bind_address() {
        let config = ApiConfig {
            enabled: true,
            bind_address: "localhost".to_string(),
        };
        assert!(ApiServer::new(&config, AppState::new()).is_err());
    }

    #[test]
    fn test_parses_bind_address() {
        let config = ApiConfig {
            enabled: true,
            bind_address: "127.0.0.1:9090".to_string(),
        };
        let server = ApiServer::new(&config, AppState::new()).unwrap();
        assert_eq!(server.addr().port(), 9090);
    }
}
