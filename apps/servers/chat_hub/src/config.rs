use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use ws_hub::{HubConfig, Result as HubResult, Topic};

#[derive(Parser, Clone, Debug, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
pub struct Config {
	/// Use JSON formatting for tracing
	#[arg(long, env = "LOG_JSON", default_value = "false")]
	pub log_json: bool,

	/// Log level
	#[arg(long, env = "RUST_LOG")]
	pub rust_log: Option<String>,

	/// Server host
	#[arg(long, env = "HOST", default_value = "0.0.0.0")]
	pub host: String,

	/// Server port
	#[arg(long, env = "PORT", default_value = "3600")]
	pub port: u16,

	/// WebSocket endpoint path
	#[arg(long, env = "WS_PATH", default_value = "/ws")]
	pub ws_path: String,

	/// Topics every connection is subscribed to on open
	#[arg(long, env = "DEFAULT_TOPICS", value_delimiter = ',', default_value = "chat")]
	pub default_topics: Vec<String>,

	/// Appended to text payloads relayed by the server, e.g. " (from server)"
	#[arg(long, env = "ECHO_SUFFIX")]
	pub echo_suffix: Option<String>,

	/// Maximum concurrent connections
	#[arg(long, env = "HUB_MAX_CONNECTIONS", default_value = "1000")]
	pub max_connections: usize,

	/// Outbound messages buffered per connection
	#[arg(long, env = "HUB_QUEUE_CAPACITY", default_value = "256")]
	pub queue_capacity: usize,

	/// Per-write timeout in milliseconds
	#[arg(long, env = "HUB_WRITE_TIMEOUT_MS", default_value = "5000")]
	pub write_timeout_ms: u64,

	/// Graceful close drain timeout in milliseconds
	#[arg(long, env = "HUB_DRAIN_TIMEOUT_MS", default_value = "2000")]
	pub drain_timeout_ms: u64,

	/// Handshake timeout in milliseconds
	#[arg(long, env = "HUB_HANDSHAKE_TIMEOUT_MS", default_value = "5000")]
	pub handshake_timeout_ms: u64,

	/// Upper bound for closing connections on shutdown, in seconds
	#[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value = "5")]
	pub shutdown_timeout_secs: u64,
}

impl Config {
	#[must_use]
	pub fn bind_addr(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}

	#[must_use]
	pub const fn hub_config(&self) -> HubConfig {
		HubConfig {
			max_connections: self.max_connections,
			queue_capacity: self.queue_capacity,
			write_timeout: Duration::from_millis(self.write_timeout_ms),
			drain_timeout: Duration::from_millis(self.drain_timeout_ms),
			handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
		}
	}

	/// Validated default topics. Blank entries are skipped.
	///
	/// # Errors
	/// Fails on the first invalid topic name.
	pub fn default_topics(&self) -> HubResult<Vec<Topic>> {
		self.default_topics.iter().map(|name| name.trim()).filter(|name| !name.is_empty()).map(Topic::new).collect()
	}

	#[must_use]
	pub const fn shutdown_timeout(&self) -> Duration {
		Duration::from_secs(self.shutdown_timeout_secs)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_the_chat_demo() {
		let config = Config::parse_from(["chat_hub"]);
		assert_eq!(config.port, 3600);
		assert_eq!(config.ws_path, "/ws");
		assert_eq!(config.default_topics().unwrap(), vec![Topic::new("chat").unwrap()]);
		assert!(config.hub_config().validate().is_ok());
	}

	#[test]
	fn default_topics_are_comma_separated() {
		let config = Config::parse_from(["chat_hub", "--default-topics", "chat, news,,alerts"]);
		let names: Vec<String> = config.default_topics().unwrap().into_iter().map(String::from).collect();
		assert_eq!(names, ["chat", "news", "alerts"]);
	}

	#[test]
	fn invalid_default_topic_is_rejected() {
		let config = Config::parse_from(["chat_hub", "--default-topics", "bad topic"]);
		assert!(config.default_topics().is_err());
	}
}
