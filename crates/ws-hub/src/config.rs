use crate::errors::{HubError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Hub tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
	/// Maximum number of concurrently registered connections
	pub max_connections: usize,
	/// Outbound entries buffered per connection before new ones are dropped
	pub queue_capacity: usize,
	/// Upper bound for a single transport write
	pub write_timeout: Duration,
	/// How long a graceful close waits for the queue to flush
	pub drain_timeout: Duration,
	/// Upper bound for the transport handshake during connect
	pub handshake_timeout: Duration,
}

impl HubConfig {
	/// Load configuration from environment variables with sensible defaults
	///
	/// # Errors
	/// Returns [`HubError::Config`] when a value parses to an unusable setting.
	pub fn from_env() -> Result<Self> {
		let defaults = Self::default();
		let config = Self {
			max_connections: env_parse("HUB_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
			queue_capacity: env_parse("HUB_QUEUE_CAPACITY").unwrap_or(defaults.queue_capacity),
			write_timeout: env_parse("HUB_WRITE_TIMEOUT_MS").map_or(defaults.write_timeout, Duration::from_millis),
			drain_timeout: env_parse("HUB_DRAIN_TIMEOUT_MS").map_or(defaults.drain_timeout, Duration::from_millis),
			handshake_timeout: env_parse("HUB_HANDSHAKE_TIMEOUT_MS").map_or(defaults.handshake_timeout, Duration::from_millis),
		};
		config.validate()?;
		Ok(config)
	}

	/// # Errors
	/// Returns [`HubError::Config`] for zero capacities or zero timeouts.
	pub fn validate(&self) -> Result<()> {
		if self.max_connections == 0 {
			return Err(HubError::Config("max_connections must be at least 1".to_string()));
		}
		if self.queue_capacity == 0 {
			return Err(HubError::Config("queue_capacity must be at least 1".to_string()));
		}
		if self.write_timeout.is_zero() {
			return Err(HubError::Config("write_timeout must be non-zero".to_string()));
		}
		Ok(())
	}

	#[must_use]
	pub const fn with_max_connections(mut self, max_connections: usize) -> Self {
		self.max_connections = max_connections;
		self
	}

	#[must_use]
	pub const fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
		self.queue_capacity = queue_capacity;
		self
	}

	#[must_use]
	pub const fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
		self.write_timeout = write_timeout;
		self
	}

	#[must_use]
	pub const fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
		self.drain_timeout = drain_timeout;
		self
	}

	#[must_use]
	pub const fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
		self.handshake_timeout = handshake_timeout;
		self
	}
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
	std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Default for HubConfig {
	fn default() -> Self {
		Self {
			max_connections: DEFAULT_MAX_CONNECTIONS,
			queue_capacity: DEFAULT_QUEUE_CAPACITY,
			write_timeout: Duration::from_secs(5),
			drain_timeout: Duration::from_secs(2),
			handshake_timeout: Duration::from_secs(5),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_config_is_valid() {
		let config = HubConfig::default();
		assert!(config.validate().is_ok());
		assert_eq!(config.queue_capacity, 256);
	}

	#[test]
	fn zero_capacity_is_rejected() {
		assert!(matches!(HubConfig::default().with_queue_capacity(0).validate(), Err(HubError::Config(_))));
		assert!(matches!(HubConfig::default().with_max_connections(0).validate(), Err(HubError::Config(_))));
	}

	#[test]
	fn from_env_overrides_defaults() {
		std::env::set_var("HUB_QUEUE_CAPACITY", "32");
		std::env::set_var("HUB_DRAIN_TIMEOUT_MS", "750");
		let config = HubConfig::from_env().unwrap();
		std::env::remove_var("HUB_QUEUE_CAPACITY");
		std::env::remove_var("HUB_DRAIN_TIMEOUT_MS");

		assert_eq!(config.queue_capacity, 32);
		assert_eq!(config.drain_timeout, Duration::from_millis(750));
		assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
	}
}
