use crate::types::{ConnectionId, Topic};
use serde::Serialize;
use std::{
	collections::HashSet,
	fmt,
	time::{Duration, Instant},
};

/// Lifecycle of a connection: `Connecting → Open → Closing → Closed`.
///
/// `Closed` is terminal. A failed handshake goes straight from `Connecting`
/// to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
	Connecting,
	Open,
	Closing,
	Closed,
}

impl ConnectionState {
	#[must_use]
	pub const fn can_transition_to(self, next: Self) -> bool {
		matches!(
			(self, next),
			(Self::Connecting, Self::Open) | (Self::Connecting | Self::Open, Self::Closing) | (Self::Connecting | Self::Closing, Self::Closed)
		)
	}

	#[must_use]
	pub const fn is_open(self) -> bool {
		matches!(self, Self::Open)
	}

	#[must_use]
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Closed)
	}
}

impl fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Connecting => write!(f, "Connecting"),
			Self::Open => write!(f, "Open"),
			Self::Closing => write!(f, "Closing"),
			Self::Closed => write!(f, "Closed"),
		}
	}
}

/// Read-only status published to observers of a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
	pub state: ConnectionState,
	pub last_error: Option<String>,
}

impl ConnectionStatus {
	pub(crate) const fn connecting() -> Self {
		Self {
			state: ConnectionState::Connecting,
			last_error: None,
		}
	}
}

/// Point-in-time view of a registered connection
#[derive(Clone, Debug)]
pub struct Connection {
	pub id: ConnectionId,
	pub established_at: Instant,
	pub state: ConnectionState,
	pub subscriptions: HashSet<Topic>,
	pub last_error: Option<String>,
}

impl Connection {
	pub(crate) fn new(id: ConnectionId) -> Self {
		Self {
			id,
			established_at: Instant::now(),
			state: ConnectionState::Connecting,
			subscriptions: HashSet::new(),
			last_error: None,
		}
	}

	/// Get connection duration
	#[must_use]
	pub fn get_duration(&self) -> Duration {
		self.established_at.elapsed()
	}

	#[must_use]
	pub fn is_subscribed_to(&self, topic: &Topic) -> bool {
		self.subscriptions.contains(topic)
	}
}
