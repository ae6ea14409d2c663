use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
};
use ws_hub::HubError;

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
	#[error("invalid frame: {0}")]
	InvalidFrame(#[from] serde_json::Error),

	#[error("topic {0} is reserved")]
	ReservedTopic(String),

	#[error(transparent)]
	Hub(#[from] HubError),

	#[error("server is at capacity")]
	AtCapacity,

	#[error("server is shutting down")]
	ShuttingDown,
}

impl ServerError {
	#[must_use]
	pub const fn status_code(&self) -> StatusCode {
		match self {
			Self::InvalidFrame(_) | Self::ReservedTopic(_) => StatusCode::BAD_REQUEST,
			Self::Hub(HubError::CapacityExceeded { .. }) | Self::AtCapacity | Self::ShuttingDown | Self::Hub(HubError::Shutdown) => StatusCode::SERVICE_UNAVAILABLE,
			Self::Hub(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	/// Label used for the error metrics
	#[must_use]
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::InvalidFrame(_) => "invalid_frame",
			Self::ReservedTopic(_) => "reserved_topic",
			Self::Hub(HubError::NotOpen { .. } | HubError::NoSuchConnection(_)) => "not_open",
			Self::Hub(_) => "hub",
			Self::AtCapacity => "at_capacity",
			Self::ShuttingDown => "shutting_down",
		}
	}
}

impl IntoResponse for ServerError {
	fn into_response(self) -> Response {
		tracing::warn!(error = %self, "Rejecting request");
		(self.status_code(), self.to_string()).into_response()
	}
}
