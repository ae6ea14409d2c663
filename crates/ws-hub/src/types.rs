use crate::errors::{HubError, Result};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc, time::SystemTime};
use uuid::Uuid;

/// Longest accepted topic name, in bytes.
pub const MAX_TOPIC_LEN: usize = 128;

/// Connection ID type for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
	#[must_use]
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}

	#[must_use]
	pub const fn from_uuid(uuid: Uuid) -> Self {
		Self(uuid)
	}

	#[must_use]
	pub const fn as_uuid(&self) -> &Uuid {
		&self.0
	}
}

impl Default for ConnectionId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for ConnectionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Validated topic name.
///
/// Topics are non-empty, at most [`MAX_TOPIC_LEN`] bytes, and made of ASCII
/// alphanumerics plus `.`, `_`, `-`, `:` and `/`. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(Arc<str>);

impl Topic {
	/// Validate and wrap a topic name.
	///
	/// # Errors
	/// Returns [`HubError::InvalidTopic`] when the name is empty, too long, or
	/// contains characters outside the allowed set.
	pub fn new(name: impl AsRef<str>) -> Result<Self> {
		let name = name.as_ref();
		validate_topic(name)?;
		Ok(Self(Arc::from(name)))
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

fn validate_topic(name: &str) -> Result<()> {
	let reason = if name.is_empty() {
		"topic must not be empty"
	} else if name.len() > MAX_TOPIC_LEN {
		"topic is longer than 128 bytes"
	} else if !name.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-' | b':' | b'/')) {
		"topic contains characters outside [A-Za-z0-9._:/-]"
	} else {
		return Ok(());
	};

	Err(HubError::InvalidTopic {
		name: name.chars().take(MAX_TOPIC_LEN).collect(),
		reason,
	})
}

impl fmt::Display for Topic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for Topic {
	type Err = HubError;

	fn from_str(s: &str) -> Result<Self> {
		Self::new(s)
	}
}

impl TryFrom<&str> for Topic {
	type Error = HubError;

	fn try_from(value: &str) -> Result<Self> {
		Self::new(value)
	}
}

impl TryFrom<String> for Topic {
	type Error = HubError;

	fn try_from(value: String) -> Result<Self> {
		Self::new(value)
	}
}

impl From<Topic> for String {
	fn from(topic: Topic) -> Self {
		topic.0.to_string()
	}
}

impl AsRef<str> for Topic {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

/// A published message. Immutable once built; fan-out shares it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
	topic: Topic,
	payload: Bytes,
	sequence: u64,
	publisher: Option<ConnectionId>,
	published_at: SystemTime,
}

impl Message {
	#[must_use]
	pub fn new(topic: Topic, payload: Bytes, sequence: u64, publisher: Option<ConnectionId>) -> Self {
		Self {
			topic,
			payload,
			sequence,
			publisher,
			published_at: SystemTime::now(),
		}
	}

	#[must_use]
	pub const fn topic(&self) -> &Topic {
		&self.topic
	}

	#[must_use]
	pub const fn payload(&self) -> &Bytes {
		&self.payload
	}

	/// Sequence number, monotonically increasing per publisher connection
	/// (or per hub for hub-originated messages).
	#[must_use]
	pub const fn sequence(&self) -> u64 {
		self.sequence
	}

	/// Publishing connection, `None` for hub-originated messages.
	#[must_use]
	pub const fn publisher(&self) -> Option<ConnectionId> {
		self.publisher
	}

	#[must_use]
	pub const fn published_at(&self) -> SystemTime {
		self.published_at
	}

	/// Payload as UTF-8 text, if it is valid UTF-8.
	#[must_use]
	pub fn text(&self) -> Option<&str> {
		std::str::from_utf8(&self.payload).ok()
	}

	/// Decode the payload as JSON.
	///
	/// # Errors
	/// Returns [`HubError::Serialization`] when the payload is not valid JSON for `T`.
	pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
		serde_json::from_slice(&self.payload).map_err(HubError::from)
	}
}
