use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hub-wide counters. Updated with relaxed atomics, read as a snapshot.
#[derive(Debug, Default)]
pub struct HubMetrics {
	connections_opened: AtomicU64,
	connections_rejected: AtomicU64,
	connections_closed: AtomicU64,
	published: AtomicU64,
	enqueued: AtomicU64,
	dropped: AtomicU64,
	stale_targets: AtomicU64,
	delivered: AtomicU64,
	write_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
	pub connections_opened: u64,
	pub connections_rejected: u64,
	pub connections_closed: u64,
	pub published: u64,
	pub enqueued: u64,
	/// Entries dropped because the recipient's queue was full
	pub dropped: u64,
	/// Fan-out targets that were already gone at enqueue time
	pub stale_targets: u64,
	pub delivered: u64,
	pub write_failures: u64,
}

impl HubMetrics {
	pub(crate) fn connection_opened(&self) {
		self.connections_opened.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn connection_rejected(&self) {
		self.connections_rejected.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn connection_closed(&self) {
		self.connections_closed.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn message_published(&self) {
		self.published.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn entry_enqueued(&self) {
		self.enqueued.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn entry_dropped(&self) {
		self.dropped.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn stale_target(&self) {
		self.stale_targets.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn entry_delivered(&self) {
		self.delivered.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn write_failed(&self) {
		self.write_failures.fetch_add(1, Ordering::Relaxed);
	}

	#[must_use]
	pub fn snapshot(&self) -> MetricsSnapshot {
		MetricsSnapshot {
			connections_opened: self.connections_opened.load(Ordering::Relaxed),
			connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
			connections_closed: self.connections_closed.load(Ordering::Relaxed),
			published: self.published.load(Ordering::Relaxed),
			enqueued: self.enqueued.load(Ordering::Relaxed),
			dropped: self.dropped.load(Ordering::Relaxed),
			stale_targets: self.stale_targets.load(Ordering::Relaxed),
			delivered: self.delivered.load(Ordering::Relaxed),
			write_failures: self.write_failures.load(Ordering::Relaxed),
		}
	}
}
