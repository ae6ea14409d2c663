//! JSON frames exchanged over the WebSocket.
//!
//! Control replies (welcome, pong, errors) travel through the connection's
//! delivery queue like any other message, on reserved `hub:` topics that
//! clients can neither subscribe nor publish to. That keeps every frame a
//! client receives in one FIFO stream.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ws_hub::{ConnectionId, Message, Topic};

pub const RESERVED_PREFIX: &str = "hub:";

lazy_static! {
	pub static ref WELCOME_TOPIC: Topic = Topic::new("hub:welcome").expect("valid reserved topic");
	pub static ref PONG_TOPIC: Topic = Topic::new("hub:pong").expect("valid reserved topic");
	pub static ref ERROR_TOPIC: Topic = Topic::new("hub:error").expect("valid reserved topic");
}

#[must_use]
pub fn is_reserved(topic: &Topic) -> bool {
	topic.as_str().starts_with(RESERVED_PREFIX)
}

/// Frames sent by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
	Subscribe { topic: Topic },
	Unsubscribe { topic: Topic },
	Publish { topic: Topic, payload: Value },
	Ping,
}

impl ClientMessage {
	#[must_use]
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::Subscribe { .. } => "subscribe",
			Self::Unsubscribe { .. } => "unsubscribe",
			Self::Publish { .. } => "publish",
			Self::Ping => "ping",
		}
	}
}

/// Frames sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
	/// Transport handshake frame, written before the connection is registered
	Ping,
	/// First frame delivered once the connection is open
	Welcome { connection_id: String },
	Message {
		topic: Topic,
		seq: u64,
		#[serde(skip_serializing_if = "Option::is_none")]
		from: Option<ConnectionId>,
		payload: Value,
	},
	Error { message: String },
	Pong,
}

impl From<&Message> for ServerMessage {
	fn from(message: &Message) -> Self {
		let text = || message.text().unwrap_or_default().to_string();
		let topic = message.topic();

		if topic == &*WELCOME_TOPIC {
			Self::Welcome { connection_id: text() }
		} else if topic == &*PONG_TOPIC {
			Self::Pong
		} else if topic == &*ERROR_TOPIC {
			Self::Error { message: text() }
		} else {
			Self::Message {
				topic: topic.clone(),
				seq: message.sequence(),
				from: message.publisher(),
				payload: decode_payload(message),
			}
		}
	}
}

/// Payloads published over the socket are JSON. Anything else (hub-originated
/// plain text) is relayed as a JSON string.
fn decode_payload(message: &Message) -> Value {
	serde_json::from_slice(message.payload()).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(message.payload()).into_owned()))
}

/// Apply the relay suffix to string payloads; other JSON is relayed untouched.
#[must_use]
pub fn with_suffix(payload: Value, suffix: Option<&str>) -> Value {
	match (payload, suffix) {
		(Value::String(text), Some(suffix)) => Value::String(format!("{text}{suffix}")),
		(payload, _) => payload,
	}
}
