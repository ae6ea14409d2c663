use super::conn::{Connection, ConnectionState, ConnectionStatus};
use super::queue::{DeliveryQueue, EnqueueOutcome};
use super::registry::ConnectionRegistry;
use super::router::{FanOut, TopicRouter};
use crate::actor::{DrainExit, DrainFailure};
use crate::config::HubConfig;
use crate::errors::{HubError, Result, TransportError};
use crate::metrics::{HubMetrics, MetricsSnapshot};
use crate::transport::Transport;
use crate::types::{ConnectionId, Message, Topic};
use bytes::Bytes;
use std::sync::{
	atomic::{AtomicBool, AtomicU64, Ordering},
	Arc, Weak,
};
use tokio::{
	sync::{mpsc, watch},
	task::{JoinHandle, JoinSet},
	time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
	/// Flush the queue (bounded by the drain timeout) before closing
	Graceful,
	/// Discard whatever is still queued
	Forced,
}

struct HubInner {
	config: HubConfig,
	registry: ConnectionRegistry,
	router: TopicRouter,
	queue: DeliveryQueue,
	metrics: Arc<HubMetrics>,
	/// Sequence for hub-originated messages
	sequence: AtomicU64,
	accepting: AtomicBool,
	shutdown: CancellationToken,
}

impl Drop for HubInner {
	fn drop(&mut self) {
		self.shutdown.cancel();
	}
}

/// Hub coordinator.
///
/// Owns the connection registry, the topic router and the delivery queues, and
/// is the only place connection state changes. Cloning is cheap; every clone
/// drives the same hub.
#[derive(Clone)]
pub struct Hub {
	inner: Arc<HubInner>,
}

impl Hub {
	/// Build a hub and start its failure supervisor. Must be called inside a tokio runtime.
	///
	/// # Errors
	/// Returns [`HubError::Config`] for an invalid configuration.
	pub fn new(config: HubConfig) -> Result<Self> {
		config.validate()?;

		let metrics = Arc::new(HubMetrics::default());
		let shutdown = CancellationToken::new();
		let (queue, failures) = DeliveryQueue::new(&config, Arc::clone(&metrics), shutdown.child_token());

		let inner = Arc::new(HubInner {
			registry: ConnectionRegistry::new(config.max_connections),
			router: TopicRouter::new(),
			queue,
			metrics,
			sequence: AtomicU64::new(0),
			accepting: AtomicBool::new(true),
			shutdown: shutdown.clone(),
			config,
		});

		spawn_supervisor(Arc::downgrade(&inner), failures, shutdown);

		info!(
			max_connections = inner.config.max_connections,
			queue_capacity = inner.config.queue_capacity,
			"Hub started"
		);
		Ok(Self { inner })
	}

	/// Register a connection over `transport`, run its handshake and start delivering to it.
	///
	/// # Errors
	/// - [`HubError::CapacityExceeded`] when the registry is full
	/// - [`HubError::Transport`] when the handshake fails or times out
	/// - [`HubError::Shutdown`] once [`Hub::shutdown`] has started
	pub async fn connect<T: Transport>(&self, mut transport: T) -> Result<ConnectionId> {
		if !self.inner.accepting.load(Ordering::Acquire) {
			return Err(HubError::Shutdown);
		}

		let id = match self.inner.registry.register() {
			Ok(id) => id,
			Err(err) => {
				self.inner.metrics.connection_rejected();
				warn!(error = %err, "Rejecting connection");
				return Err(err);
			}
		};

		let handshake = match timeout(self.inner.config.handshake_timeout, transport.handshake()).await {
			Ok(result) => result,
			Err(_) => Err(TransportError::HandshakeFailed(format!("no response within {:?}", self.inner.config.handshake_timeout))),
		};

		if let Err(err) = handshake {
			warn!(connection_id = %id, error = %err, "Handshake failed");
			let _ = self.inner.registry.transition(&id, ConnectionState::Closed, Some(err.to_string()));
			self.inner.registry.unregister(&id);
			transport.close().await;
			return Err(err.into());
		}

		// A shutdown may have torn the connection down while the handshake ran
		if let Err(err) = self.inner.registry.transition(&id, ConnectionState::Open, None) {
			debug!(connection_id = %id, error = %err, "Connection torn down during handshake");
			transport.close().await;
			return Err(self.abandoned(err));
		}

		self.inner.queue.open(id, transport);
		if self.inner.registry.state(&id) != Some(ConnectionState::Open) {
			// Teardown started before the lane existed and cannot see it
			self.inner.queue.clear(&id).await;
			return Err(self.abandoned(HubError::NoSuchConnection(id)));
		}
		self.inner.metrics.connection_opened();

		info!(
			connection_id = %id,
			connections = self.inner.registry.len(),
			"Connection open"
		);
		Ok(id)
	}

	fn abandoned(&self, err: HubError) -> HubError {
		if self.is_accepting() {
			err
		} else {
			HubError::Shutdown
		}
	}

	/// Subscribe an open connection to `topic`. Returns `false` if it already was.
	///
	/// # Errors
	/// [`HubError::NoSuchConnection`] or [`HubError::NotOpen`].
	pub fn subscribe(&self, id: &ConnectionId, topic: &Topic) -> Result<bool> {
		// Router update happens under the registry entry lock so a concurrent
		// teardown sees either both sides or neither.
		self.inner.registry.with_open_mut(id, |conn| {
			let added = conn.subscriptions.insert(topic.clone());
			self.inner.router.subscribe(*id, topic);
			added
		})
	}

	/// Drop a connection's subscription to `topic`. Returns `false` if there was none.
	///
	/// # Errors
	/// [`HubError::NoSuchConnection`] for unknown ids.
	pub fn unsubscribe(&self, id: &ConnectionId, topic: &Topic) -> Result<bool> {
		self.inner.registry.with_connection_mut(id, |conn| {
			let removed = conn.subscriptions.remove(topic);
			self.inner.router.unsubscribe(id, topic);
			removed
		})
	}

	/// Publish `payload` on `topic` from connection `from`.
	///
	/// Fan-out is best effort per recipient: full or vanished recipients are
	/// counted in the returned [`FanOut`], never reported as errors.
	///
	/// # Errors
	/// Only the publisher's own problems: [`HubError::NoSuchConnection`] or [`HubError::NotOpen`].
	pub fn publish(&self, from: &ConnectionId, topic: &Topic, payload: impl Into<Bytes>) -> Result<FanOut> {
		let sequence = self.inner.registry.next_sequence(from)?;
		let message = Arc::new(Message::new(topic.clone(), payload.into(), sequence, Some(*from)));
		Ok(self.route(&message))
	}

	/// Publish a hub-originated message (no publisher connection).
	pub fn broadcast(&self, topic: &Topic, payload: impl Into<Bytes>) -> FanOut {
		let message = Arc::new(Message::new(topic.clone(), payload.into(), self.next_hub_sequence(), None));
		self.route(&message)
	}

	/// Queue a hub-originated message for a single connection, bypassing topic routing.
	pub fn send_to(&self, id: &ConnectionId, topic: &Topic, payload: impl Into<Bytes>) -> EnqueueOutcome {
		let message = Arc::new(Message::new(topic.clone(), payload.into(), self.next_hub_sequence(), None));
		self.inner.queue.enqueue(id, message)
	}

	fn next_hub_sequence(&self) -> u64 {
		self.inner.sequence.fetch_add(1, Ordering::Relaxed) + 1
	}

	fn route(&self, message: &Arc<Message>) -> FanOut {
		self.inner.metrics.message_published();
		let fan_out = self.inner.router.publish(message, &self.inner.queue);
		debug!(
			topic = %message.topic(),
			sequence = message.sequence(),
			attempted = fan_out.attempted,
			enqueued = fan_out.enqueued,
			"Message published"
		);
		fan_out
	}

	/// Close a connection gracefully: stop routing to it, let its queue flush
	/// (bounded by the drain timeout), then remove it.
	///
	/// Returns `false` if the connection is unknown or already being torn down.
	pub async fn close(&self, id: &ConnectionId, reason: &str) -> bool {
		self.teardown(id, Teardown::Graceful, reason, None).await
	}

	/// Tear a connection down immediately, discarding anything still queued.
	/// Hosts call this when their transport reports the peer is gone.
	pub async fn disconnect(&self, id: &ConnectionId, reason: &str) -> bool {
		self.teardown(id, Teardown::Forced, reason, None).await
	}

	async fn fail(&self, failure: DrainFailure) {
		let error = failure.error.to_string();
		self.teardown(&failure.connection_id, Teardown::Forced, "transport failure", Some(error)).await;
	}

	async fn teardown(&self, id: &ConnectionId, mode: Teardown, reason: &str, error: Option<String>) -> bool {
		let previous = match self.inner.registry.transition(id, ConnectionState::Closing, error) {
			Ok(previous) => previous,
			Err(HubError::NoSuchConnection(_)) => {
				debug!(connection_id = %id, reason = reason, "Teardown of unknown connection ignored");
				return false;
			}
			Err(err) => {
				debug!(connection_id = %id, reason = reason, error = %err, "Teardown already in progress");
				return false;
			}
		};

		// Closing connections reject subscribe, so this set is final
		let left = self
			.inner
			.registry
			.get(id)
			.map_or(0, |conn| self.inner.router.remove_connection(id, conn.subscriptions.iter()));

		let exit = match mode {
			Teardown::Graceful => self.inner.queue.close(id, self.inner.config.drain_timeout).await,
			Teardown::Forced => self.inner.queue.clear(id).await,
		};

		let _ = self.inner.registry.transition(id, ConnectionState::Closed, None);
		let lifetime = self.inner.registry.unregister(id).map(|conn| conn.get_duration()).unwrap_or_default();
		if previous == ConnectionState::Open {
			self.inner.metrics.connection_closed();
		}

		info!(
			connection_id = %id,
			reason = reason,
			topics_left = left,
			drain = ?exit.unwrap_or(DrainExit::Cancelled),
			lifetime_ms = lifetime.as_millis(),
			"Connection closed"
		);
		true
	}

	/// Stop accepting connections and close every open one gracefully.
	pub async fn shutdown(&self) {
		self.inner.accepting.store(false, Ordering::Release);

		let ids = self.inner.registry.ids();
		info!(connections = ids.len(), "Hub shutting down");

		let mut closing = JoinSet::new();
		for id in ids {
			let hub = self.clone();
			closing.spawn(async move { hub.close(&id, "hub shutdown").await });
		}
		while closing.join_next().await.is_some() {}

		self.inner.shutdown.cancel();
		info!("Hub shut down");
	}

	#[must_use]
	pub fn connection(&self, id: &ConnectionId) -> Option<Connection> {
		self.inner.registry.get(id)
	}

	#[must_use]
	pub fn state(&self, id: &ConnectionId) -> Option<ConnectionState> {
		self.inner.registry.state(id)
	}

	/// Observe a connection's state and last error. The last value seen after
	/// the connection is removed is its final `Closed` status.
	#[must_use]
	pub fn watch(&self, id: &ConnectionId) -> Option<watch::Receiver<ConnectionStatus>> {
		self.inner.registry.watch(id)
	}

	#[must_use]
	pub fn connection_count(&self) -> usize {
		self.inner.registry.len()
	}

	#[must_use]
	pub fn subscribers(&self, topic: &Topic) -> Vec<ConnectionId> {
		self.inner.router.subscribers(topic)
	}

	#[must_use]
	pub fn is_subscribed(&self, id: &ConnectionId, topic: &Topic) -> bool {
		self.inner.router.is_subscribed(id, topic)
	}

	#[must_use]
	pub fn topics(&self) -> Vec<Topic> {
		self.inner.router.topics()
	}

	#[must_use]
	pub fn topic_count(&self) -> usize {
		self.inner.router.topic_count()
	}

	/// Entries waiting in the connection's delivery queue
	#[must_use]
	pub fn pending(&self, id: &ConnectionId) -> usize {
		self.inner.queue.pending(id)
	}

	#[must_use]
	pub fn metrics(&self) -> MetricsSnapshot {
		self.inner.metrics.snapshot()
	}

	#[must_use]
	pub fn config(&self) -> &HubConfig {
		&self.inner.config
	}

	#[must_use]
	pub fn is_accepting(&self) -> bool {
		self.inner.accepting.load(Ordering::Acquire)
	}
}

/// Turns drain failures into forced teardowns. Holds only a weak reference so
/// it never keeps the hub alive.
fn spawn_supervisor(hub: Weak<HubInner>, mut failures: mpsc::UnboundedReceiver<DrainFailure>, shutdown: CancellationToken) -> JoinHandle<()> {
	tokio::spawn(async move {
		loop {
			tokio::select! {
				() = shutdown.cancelled() => break,
				failure = failures.recv() => {
					let Some(failure) = failure else { break };
					let Some(inner) = hub.upgrade() else { break };
					Hub { inner }.fail(failure).await;
				}
			}
		}
		debug!("Hub supervisor stopped");
	})
}
