use super::conn::{Connection, ConnectionState, ConnectionStatus};
use crate::errors::{HubError, Result};
use crate::types::ConnectionId;
use dashmap::DashMap;
use std::sync::{
	atomic::{AtomicU64, Ordering},
	Arc,
};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Registry-owned record for one connection
struct Slot {
	connection: Connection,
	status: watch::Sender<ConnectionStatus>,
	sequence: AtomicU64,
	// Returned to the capacity pool when the slot is dropped
	_permit: OwnedSemaphorePermit,
}

impl Slot {
	fn publish_status(&self) {
		self.status.send_replace(ConnectionStatus {
			state: self.connection.state,
			last_error: self.connection.last_error.clone(),
		});
	}
}

/// Tracks live connections, their state and their subscription sets.
///
/// Admission is bounded by a semaphore: each registered connection holds one
/// permit until it is unregistered.
pub struct ConnectionRegistry {
	connections: DashMap<ConnectionId, Slot>,
	capacity: Arc<Semaphore>,
	limit: usize,
}

impl ConnectionRegistry {
	#[must_use]
	pub fn new(limit: usize) -> Self {
		Self {
			connections: DashMap::new(),
			capacity: Arc::new(Semaphore::new(limit)),
			limit,
		}
	}

	/// Register a new connection in the `Connecting` state.
	///
	/// # Errors
	/// Returns [`HubError::CapacityExceeded`] when every permit is taken.
	pub fn register(&self) -> Result<ConnectionId> {
		let permit = Arc::clone(&self.capacity)
			.try_acquire_owned()
			.map_err(|_| HubError::CapacityExceeded { limit: self.limit })?;

		let id = ConnectionId::new();
		let (status, _) = watch::channel(ConnectionStatus::connecting());
		self.connections.insert(
			id,
			Slot {
				connection: Connection::new(id),
				status,
				sequence: AtomicU64::new(0),
				_permit: permit,
			},
		);

		debug!(connection_id = %id, "Connection registered");
		Ok(id)
	}

	/// Remove a connection. Unknown ids are a no-op.
	///
	/// Observers of the connection see a final `Closed` status.
	pub fn unregister(&self, id: &ConnectionId) -> Option<Connection> {
		let (_, mut slot) = self.connections.remove(id)?;
		if slot.connection.state != ConnectionState::Closed {
			slot.connection.state = ConnectionState::Closed;
			slot.publish_status();
		}
		debug!(connection_id = %id, "Connection unregistered");
		Some(slot.connection)
	}

	#[must_use]
	pub fn get(&self, id: &ConnectionId) -> Option<Connection> {
		self.connections.get(id).map(|slot| slot.connection.clone())
	}

	#[must_use]
	pub fn state(&self, id: &ConnectionId) -> Option<ConnectionState> {
		self.connections.get(id).map(|slot| slot.connection.state)
	}

	#[must_use]
	pub fn watch(&self, id: &ConnectionId) -> Option<watch::Receiver<ConnectionStatus>> {
		self.connections.get(id).map(|slot| slot.status.subscribe())
	}

	/// Move a connection to `next`, recording `error` as its last error if given.
	/// Returns the previous state.
	pub(crate) fn transition(&self, id: &ConnectionId, next: ConnectionState, error: Option<String>) -> Result<ConnectionState> {
		let mut slot = self.connections.get_mut(id).ok_or(HubError::NoSuchConnection(*id))?;
		let current = slot.connection.state;
		if !current.can_transition_to(next) {
			return Err(HubError::InvalidTransition { from: current, to: next });
		}

		slot.connection.state = next;
		if error.is_some() {
			slot.connection.last_error = error;
		}
		slot.publish_status();
		Ok(current)
	}

	/// Run `f` against an open connection while holding its exclusive lock.
	pub(crate) fn with_open_mut<F, R>(&self, id: &ConnectionId, f: F) -> Result<R>
	where
		F: FnOnce(&mut Connection) -> R,
	{
		let mut slot = self.connections.get_mut(id).ok_or(HubError::NoSuchConnection(*id))?;
		if !slot.connection.state.is_open() {
			return Err(HubError::NotOpen {
				id: *id,
				state: slot.connection.state,
			});
		}
		Ok(f(&mut slot.connection))
	}

	/// Apply mutable operation to a connection if it exists
	pub(crate) fn with_connection_mut<F, R>(&self, id: &ConnectionId, f: F) -> Result<R>
	where
		F: FnOnce(&mut Connection) -> R,
	{
		let mut slot = self.connections.get_mut(id).ok_or(HubError::NoSuchConnection(*id))?;
		Ok(f(&mut slot.connection))
	}

	/// Next publish sequence number for an open connection, starting at 1.
	pub(crate) fn next_sequence(&self, id: &ConnectionId) -> Result<u64> {
		let slot = self.connections.get(id).ok_or(HubError::NoSuchConnection(*id))?;
		if !slot.connection.state.is_open() {
			return Err(HubError::NotOpen {
				id: *id,
				state: slot.connection.state,
			});
		}
		Ok(slot.sequence.fetch_add(1, Ordering::Relaxed) + 1)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.connections.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.connections.is_empty()
	}

	#[must_use]
	pub fn ids(&self) -> Vec<ConnectionId> {
		self.connections.iter().map(|entry| *entry.key()).collect()
	}

	#[must_use]
	pub const fn limit(&self) -> usize {
		self.limit
	}

	/// Connections that can still be admitted
	#[must_use]
	pub fn available(&self) -> usize {
		self.capacity.available_permits()
	}
}
