use axum::{routing::get, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use ws_hub::{Hub, Topic};

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod websocket;

pub use config::Config;
pub use error::ServerError;

#[derive(Clone)]
pub struct AppState {
	pub hub: Hub,
	pub config: Arc<Config>,
	pub default_topics: Arc<[Topic]>,
	pub shutdown: CancellationToken,
}

impl AppState {
	/// # Errors
	/// Fails when a configured default topic is not a valid topic name.
	pub fn build(config: Arc<Config>, hub: Hub, shutdown: CancellationToken) -> anyhow::Result<Self> {
		let default_topics = config.default_topics()?.into();
		Ok(Self {
			hub,
			config,
			default_topics,
			shutdown,
		})
	}
}

/// HTTP surface: the WebSocket endpoint plus health and metrics
pub fn app(state: AppState) -> Router {
	Router::new()
		.route(&state.config.ws_path, get(websocket::websocket_handler))
		.route("/health", get(health::health))
		.route("/metrics", get(metrics::metrics_handler))
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
		.with_state(state)
}
