use crate::core::conn::ConnectionState;
use crate::types::ConnectionId;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for hub operations
pub type Result<T> = std::result::Result<T, HubError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
	#[error("connection capacity exceeded: {limit}")]
	CapacityExceeded { limit: usize },

	#[error("connection {0} not found")]
	NoSuchConnection(ConnectionId),

	#[error("connection {id} not open (current state: {state})")]
	NotOpen { id: ConnectionId, state: ConnectionState },

	#[error("invalid state transition from {from} to {to}")]
	InvalidTransition { from: ConnectionState, to: ConnectionState },

	#[error("invalid topic {name:?}: {reason}")]
	InvalidTopic { name: String, reason: &'static str },

	#[error("transport error: {0}")]
	Transport(#[from] TransportError),

	#[error("serialization error: {0}")]
	Serialization(String),

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("hub is shut down")]
	Shutdown,
}

impl From<serde_json::Error> for HubError {
	fn from(err: serde_json::Error) -> Self {
		Self::Serialization(err.to_string())
	}
}

/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
	/// The peer or the underlying channel is gone
	#[error("transport closed")]
	Closed,

	/// A write did not complete within the configured bound
	#[error("write timed out after {0:?}")]
	WriteTimeout(Duration),

	#[error("write failed: {0}")]
	WriteFailed(String),

	#[error("handshake failed: {0}")]
	HandshakeFailed(String),
}
