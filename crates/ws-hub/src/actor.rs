use crate::core::queue::OutboundEntry;
use crate::errors::TransportError;
use crate::metrics::HubMetrics;
use crate::transport::Transport;
use crate::types::ConnectionId;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// Reported to the coordinator when a drain worker gives up on its transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainFailure {
	pub connection_id: ConnectionId,
	pub error: TransportError,
}

/// Why a drain worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainExit {
	/// The queue was closed and every buffered entry was written
	Drained,
	/// Cancelled; remaining entries were discarded
	Cancelled,
	/// A write failed or timed out
	Failed,
}

/// Drain worker that owns one connection's transport and its queue receiver.
///
/// Entries are written strictly in FIFO order, one at a time. Each write is
/// bounded by `write_timeout` and abandoned immediately on cancellation.
pub struct DrainActor<T: Transport> {
	connection_id: ConnectionId,
	transport: T,
	entries: mpsc::Receiver<OutboundEntry>,
	cancel: CancellationToken,
	write_timeout: Duration,
	metrics: Arc<HubMetrics>,
	failures: mpsc::UnboundedSender<DrainFailure>,
}

impl<T: Transport> DrainActor<T> {
	#[must_use]
	pub fn new(
		connection_id: ConnectionId,
		transport: T,
		entries: mpsc::Receiver<OutboundEntry>,
		cancel: CancellationToken,
		write_timeout: Duration,
		metrics: Arc<HubMetrics>,
		failures: mpsc::UnboundedSender<DrainFailure>,
	) -> Self {
		Self {
			connection_id,
			transport,
			entries,
			cancel,
			write_timeout,
			metrics,
			failures,
		}
	}

	pub fn start(self) -> JoinHandle<DrainExit> {
		tokio::spawn(self.run())
	}

	/// Run the drain loop until the queue closes, a write fails, or the worker is cancelled.
	pub async fn run(mut self) -> DrainExit {
		let mut written = 0u64;

		let exit = loop {
			let next = tokio::select! {
				biased;
				() = self.cancel.cancelled() => break DrainExit::Cancelled,
				next = self.entries.recv() => next,
			};

			let Some(entry) = next else {
				break DrainExit::Drained;
			};

			let write = timeout(self.write_timeout, self.transport.write(Arc::clone(&entry.message)));
			let result = tokio::select! {
				biased;
				() = self.cancel.cancelled() => break DrainExit::Cancelled,
				result = write => result,
			};

			match result {
				Ok(Ok(())) => {
					written += 1;
					self.metrics.entry_delivered();
					trace!(
						connection_id = %self.connection_id,
						topic = %entry.message.topic(),
						queued_us = entry.enqueued_at.elapsed().as_micros(),
						"Entry written"
					);
				}
				Ok(Err(err)) => break self.fail(err),
				Err(_elapsed) => break self.fail(TransportError::WriteTimeout(self.write_timeout)),
			}
		};

		// Bound the close so a wedged peer cannot pin the worker
		if timeout(self.write_timeout, self.transport.close()).await.is_err() {
			debug!(connection_id = %self.connection_id, "Transport close timed out");
		}

		debug!(
			connection_id = %self.connection_id,
			written = written,
			exit = ?exit,
			"Drain worker stopped"
		);
		exit
	}

	fn fail(&self, err: TransportError) -> DrainExit {
		self.metrics.write_failed();
		error!(
			connection_id = %self.connection_id,
			error = %err,
			"Transport write failed, connection will be torn down"
		);
		let _ = self.failures.send(DrainFailure {
			connection_id: self.connection_id,
			error: err,
		});
		DrainExit::Failed
	}
}
