use crate::AppState;
use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use tracing::instrument;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
	status: &'static str,
	version: &'static str,
	connections: usize,
	topics: usize,
}

#[instrument(name = "health", skip(state))]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
	let (code, status) = if state.hub.is_accepting() {
		(StatusCode::OK, "healthy")
	} else {
		(StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
	};

	let response = HealthResponse {
		status,
		version: env!("CARGO_PKG_VERSION"),
		connections: state.hub.connection_count(),
		topics: state.hub.topic_count(),
	};

	(code, Json(response))
}
