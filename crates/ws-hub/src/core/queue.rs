use crate::actor::{DrainActor, DrainExit, DrainFailure};
use crate::config::HubConfig;
use crate::metrics::HubMetrics;
use crate::transport::Transport;
use crate::types::{ConnectionId, Message};
use dashmap::DashMap;
use std::{
	sync::Arc,
	time::{Duration, Instant},
};
use tokio::{
	sync::mpsc::{self, error::TrySendError},
	task::JoinHandle,
	time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One pending delivery to one connection
#[derive(Debug, Clone)]
pub struct OutboundEntry {
	pub connection_id: ConnectionId,
	pub message: Arc<Message>,
	pub enqueued_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
	Enqueued,
	/// The recipient's buffer was full; this (newest) entry was discarded
	Dropped,
	NoSuchConnection,
}

/// A connection's buffer plus the worker draining it
pub(crate) struct Lane {
	sender: mpsc::Sender<OutboundEntry>,
	cancel: CancellationToken,
	worker: JoinHandle<DrainExit>,
}

impl Lane {
	/// Stop accepting entries and wait for the worker.
	///
	/// With a grace period the worker flushes what is buffered first and is
	/// cancelled if that takes longer than `grace`. Without one, buffered
	/// entries are discarded immediately.
	pub(crate) async fn finish(self, grace: Option<Duration>) -> DrainExit {
		let Self { sender, cancel, mut worker } = self;
		drop(sender);

		if let Some(grace) = grace {
			match timeout(grace, &mut worker).await {
				Ok(Ok(exit)) => return exit,
				Ok(Err(err)) => {
					warn!(error = %err, "Drain worker panicked");
					return DrainExit::Failed;
				}
				Err(_) => debug!("Drain grace period elapsed, clearing queue"),
			}
		}

		cancel.cancel();
		worker.await.unwrap_or(DrainExit::Failed)
	}
}

/// Per-connection bounded outbound buffers.
///
/// Each open connection gets a bounded channel and a drain worker. A full
/// buffer drops the newest entry and keeps older ones in order, so a slow
/// recipient costs bounded memory and never blocks the publisher.
pub struct DeliveryQueue {
	lanes: DashMap<ConnectionId, Lane>,
	capacity: usize,
	write_timeout: Duration,
	metrics: Arc<HubMetrics>,
	failures: mpsc::UnboundedSender<DrainFailure>,
	shutdown: CancellationToken,
}

impl DeliveryQueue {
	/// Create a queue set. The receiver yields a [`DrainFailure`] for every
	/// worker whose transport failed.
	#[must_use]
	pub fn new(config: &HubConfig, metrics: Arc<HubMetrics>, shutdown: CancellationToken) -> (Self, mpsc::UnboundedReceiver<DrainFailure>) {
		let (failures, failure_rx) = mpsc::unbounded_channel();
		let queue = Self {
			lanes: DashMap::new(),
			capacity: config.queue_capacity.max(1),
			write_timeout: config.write_timeout,
			metrics,
			failures,
			shutdown,
		};
		(queue, failure_rx)
	}

	/// Create the buffer for `connection_id` and start draining it into `transport`.
	pub fn open<T: Transport>(&self, connection_id: ConnectionId, transport: T) {
		let (sender, receiver) = mpsc::channel(self.capacity);
		let cancel = self.shutdown.child_token();
		let worker = DrainActor::new(
			connection_id,
			transport,
			receiver,
			cancel.clone(),
			self.write_timeout,
			Arc::clone(&self.metrics),
			self.failures.clone(),
		)
		.start();

		if let Some(previous) = self.lanes.insert(connection_id, Lane { sender, cancel, worker }) {
			warn!(connection_id = %connection_id, "Replacing existing delivery lane");
			previous.cancel.cancel();
		}
	}

	/// Append `message` to the connection's buffer without waiting.
	pub fn enqueue(&self, connection_id: &ConnectionId, message: Arc<Message>) -> EnqueueOutcome {
		let Some(lane) = self.lanes.get(connection_id) else {
			self.metrics.stale_target();
			return EnqueueOutcome::NoSuchConnection;
		};

		let entry = OutboundEntry {
			connection_id: *connection_id,
			message,
			enqueued_at: Instant::now(),
		};

		match lane.sender.try_send(entry) {
			Ok(()) => {
				self.metrics.entry_enqueued();
				EnqueueOutcome::Enqueued
			}
			Err(TrySendError::Full(entry)) => {
				self.metrics.entry_dropped();
				warn!(
					connection_id = %connection_id,
					topic = %entry.message.topic(),
					capacity = self.capacity,
					"Delivery queue full, message dropped"
				);
				EnqueueOutcome::Dropped
			}
			Err(TrySendError::Closed(_)) => {
				self.metrics.stale_target();
				debug!(connection_id = %connection_id, "Delivery worker gone, entry discarded");
				EnqueueOutcome::NoSuchConnection
			}
		}
	}

	/// Entries buffered for `connection_id` and not yet picked up by its worker
	#[must_use]
	pub fn pending(&self, connection_id: &ConnectionId) -> usize {
		self.lanes.get(connection_id).map_or(0, |lane| lane.sender.max_capacity() - lane.sender.capacity())
	}

	#[must_use]
	pub fn contains(&self, connection_id: &ConnectionId) -> bool {
		self.lanes.contains_key(connection_id)
	}

	#[must_use]
	pub const fn capacity(&self) -> usize {
		self.capacity
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.lanes.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.lanes.is_empty()
	}

	/// Detach the connection's lane; later enqueues report `NoSuchConnection`.
	pub(crate) fn take(&self, connection_id: &ConnectionId) -> Option<Lane> {
		self.lanes.remove(connection_id).map(|(_, lane)| lane)
	}

	/// Close the connection's buffer, letting the worker flush for up to `grace`.
	pub async fn close(&self, connection_id: &ConnectionId, grace: Duration) -> Option<DrainExit> {
		let lane = self.take(connection_id)?;
		Some(lane.finish(Some(grace)).await)
	}

	/// Discard the connection's buffer and stop its worker.
	pub async fn clear(&self, connection_id: &ConnectionId) -> Option<DrainExit> {
		let lane = self.take(connection_id)?;
		Some(lane.finish(None).await)
	}
}
