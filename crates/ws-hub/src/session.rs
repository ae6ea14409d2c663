//! In-process clients and caller-scoped sessions.
//!
//! A [`Client`] is one hub connection whose transport is an in-process
//! channel. Any number of [`Session`]s can share it, the way several UI
//! components share one socket: each session registers its own handlers and
//! removes exactly those when it is released or dropped. The connection-level
//! subscription to a topic lives as long as at least one session still has a
//! handler for it.

use crate::core::conn::{ConnectionState, ConnectionStatus};
use crate::core::hub::Hub;
use crate::core::router::FanOut;
use crate::errors::{HubError, Result};
use crate::transport::ChannelTransport;
use crate::types::{ConnectionId, Message, Topic};
use bytes::Bytes;
use dashmap::{mapref::entry::Entry, DashMap, DashSet};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::{
	atomic::{AtomicU64, Ordering},
	Arc,
};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Callback invoked for every message delivered on a subscribed topic
pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

type SessionId = u64;

#[derive(Default)]
struct Dispatcher {
	handlers: DashMap<Topic, Vec<(SessionId, Handler)>>,
}

impl Dispatcher {
	fn dispatch(&self, message: &Message) -> usize {
		// Handlers run outside the map lock so they may (un)subscribe freely
		let handlers: Vec<Handler> = self
			.handlers
			.get(message.topic())
			.map(|entry| entry.iter().map(|(_, handler)| Arc::clone(handler)).collect())
			.unwrap_or_default();

		for handler in &handlers {
			handler(message);
		}
		handlers.len()
	}
}

struct ClientInner {
	hub: Hub,
	connection_id: ConnectionId,
	dispatcher: Arc<Dispatcher>,
	status: watch::Receiver<ConnectionStatus>,
	next_session: AtomicU64,
}

impl ClientInner {
	fn attach(&self, session: SessionId, topic: &Topic, handler: Handler) -> Result<()> {
		match self.dispatcher.handlers.entry(topic.clone()) {
			Entry::Occupied(mut entry) => {
				// The connection-level subscription already exists, but the connection may not
				self.ensure_open()?;
				entry.get_mut().push((session, handler));
			}
			Entry::Vacant(entry) => {
				self.hub.subscribe(&self.connection_id, topic)?;
				entry.insert(vec![(session, handler)]);
			}
		}
		Ok(())
	}

	fn ensure_open(&self) -> Result<()> {
		match self.hub.state(&self.connection_id) {
			Some(state) if state.is_open() => Ok(()),
			Some(state) => Err(HubError::NotOpen {
				id: self.connection_id,
				state,
			}),
			None => Err(HubError::NoSuchConnection(self.connection_id)),
		}
	}

	fn detach(&self, session: SessionId, topic: &Topic) -> bool {
		let Entry::Occupied(mut entry) = self.dispatcher.handlers.entry(topic.clone()) else {
			return false;
		};

		let before = entry.get().len();
		entry.get_mut().retain(|(owner, _)| *owner != session);
		let removed = entry.get().len() != before;

		if entry.get().is_empty() {
			entry.remove();
			// The connection may already be gone; nothing left to undo then
			let _ = self.hub.unsubscribe(&self.connection_id, topic);
		}
		removed
	}
}

impl Drop for ClientInner {
	fn drop(&mut self) {
		if self.status.borrow().state.is_terminal() {
			return;
		}
		if let Ok(runtime) = tokio::runtime::Handle::try_current() {
			let hub = self.hub.clone();
			let id = self.connection_id;
			runtime.spawn(async move {
				hub.disconnect(&id, "client dropped").await;
			});
		}
	}
}

/// In-process connection to a [`Hub`]
#[derive(Clone)]
pub struct Client {
	inner: Arc<ClientInner>,
}

impl Hub {
	/// Open an in-process connection and start dispatching its deliveries to session handlers.
	///
	/// # Errors
	/// Same as [`Hub::connect`].
	pub async fn connect_local(&self) -> Result<Client> {
		let (transport, mut inbox) = ChannelTransport::pair(self.config().queue_capacity);
		let connection_id = self.connect(transport).await?;
		let status = self.watch(&connection_id).unwrap_or_else(|| {
			let (_, rx) = watch::channel(ConnectionStatus {
				state: ConnectionState::Closed,
				last_error: None,
			});
			rx
		});

		let dispatcher = Arc::new(Dispatcher::default());
		let worker_dispatcher = Arc::clone(&dispatcher);
		tokio::spawn(async move {
			let mut dispatched = 0u64;
			while let Some(message) = inbox.recv().await {
				worker_dispatcher.dispatch(&message);
				dispatched += 1;
			}
			// The connection is gone; nothing will ever be dispatched again
			worker_dispatcher.handlers.clear();
			debug!(connection_id = %connection_id, dispatched = dispatched, "Client inbox closed");
		});

		Ok(Client {
			inner: Arc::new(ClientInner {
				hub: self.clone(),
				connection_id,
				dispatcher,
				status,
				next_session: AtomicU64::new(1),
			}),
		})
	}
}

impl Client {
	#[must_use]
	pub fn id(&self) -> ConnectionId {
		self.inner.connection_id
	}

	/// Start a new caller-scoped session on this connection
	#[must_use]
	pub fn session(&self) -> Session {
		Session {
			client: self.clone(),
			id: self.inner.next_session.fetch_add(1, Ordering::Relaxed),
			topics: DashSet::new(),
		}
	}

	#[must_use]
	pub fn state(&self) -> ConnectionState {
		self.inner.status.borrow().state
	}

	#[must_use]
	pub fn last_error(&self) -> Option<String> {
		self.inner.status.borrow().last_error.clone()
	}

	#[must_use]
	pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
		self.inner.status.clone()
	}

	/// Handlers registered across every session on this client
	#[must_use]
	pub fn handler_count(&self) -> usize {
		self.inner.dispatcher.handlers.iter().map(|entry| entry.value().len()).sum()
	}

	/// Close the connection gracefully. Every session on it stops receiving.
	pub async fn close(&self) -> bool {
		self.inner.hub.close(&self.inner.connection_id, "client closed").await
	}
}

/// Caller-scoped bundle of subscriptions.
///
/// Everything a session subscribed is undone by [`Session::release`] or, if
/// the caller forgets, when the session is dropped. Other sessions on the
/// same client are never affected.
pub struct Session {
	client: Client,
	id: SessionId,
	topics: DashSet<Topic>,
}

impl Session {
	/// Register `handler` for `topic`. A session holds at most one handler per
	/// topic: returns `false` and keeps the existing handler if it already has one.
	///
	/// # Errors
	/// Fails when the underlying connection is no longer open.
	pub fn subscribe<F>(&self, topic: &Topic, handler: F) -> Result<bool>
	where
		F: Fn(&Message) + Send + Sync + 'static,
	{
		if !self.topics.insert(topic.clone()) {
			return Ok(false);
		}

		if let Err(err) = self.client.inner.attach(self.id, topic, Arc::new(handler)) {
			self.topics.remove(topic);
			return Err(err);
		}

		debug!(
			connection_id = %self.client.id(),
			session = self.id,
			topic = %topic,
			"Session subscribed"
		);
		Ok(true)
	}

	/// Like [`Session::subscribe`], decoding each payload as JSON into `T`.
	/// Payloads that do not decode are logged and skipped.
	///
	/// # Errors
	/// Fails when the underlying connection is no longer open.
	pub fn subscribe_json<T, F>(&self, topic: &Topic, handler: F) -> Result<bool>
	where
		T: DeserializeOwned,
		F: Fn(T) + Send + Sync + 'static,
	{
		self.subscribe(topic, move |message: &Message| match message.json::<T>() {
			Ok(value) => handler(value),
			Err(err) => warn!(topic = %message.topic(), error = %err, "Skipping undecodable payload"),
		})
	}

	/// Remove this session's handler for `topic`. Returns `false` if it had none.
	pub fn unsubscribe(&self, topic: &Topic) -> bool {
		if self.topics.remove(topic).is_none() {
			return false;
		}
		self.client.inner.detach(self.id, topic)
	}

	/// Remove every handler this session registered. Returns how many were removed.
	pub fn unsubscribe_all(&self) -> usize {
		let topics: Vec<Topic> = self.topics.iter().map(|topic| topic.key().clone()).collect();
		topics.iter().filter(|topic| self.unsubscribe(topic)).count()
	}

	/// # Errors
	/// [`HubError::NotOpen`](crate::HubError::NotOpen) once the connection is closing.
	pub fn publish(&self, topic: &Topic, payload: impl Into<Bytes>) -> Result<FanOut> {
		self.client.inner.hub.publish(&self.client.inner.connection_id, topic, payload)
	}

	/// # Errors
	/// Serialization failures, plus everything [`Session::publish`] can return.
	pub fn publish_json<T: Serialize>(&self, topic: &Topic, value: &T) -> Result<FanOut> {
		let payload = serde_json::to_vec(value)?;
		self.publish(topic, payload)
	}

	#[must_use]
	pub fn topics(&self) -> Vec<Topic> {
		self.topics.iter().map(|topic| topic.key().clone()).collect()
	}

	#[must_use]
	pub fn client(&self) -> &Client {
		&self.client
	}

	#[must_use]
	pub fn state(&self) -> ConnectionState {
		self.client.state()
	}

	#[must_use]
	pub fn last_error(&self) -> Option<String> {
		self.client.last_error()
	}

	/// End the session, removing everything it subscribed.
	pub fn release(self) {
		let removed = self.unsubscribe_all();
		debug!(connection_id = %self.client.id(), session = self.id, removed = removed, "Session released");
	}
}

impl Drop for Session {
	fn drop(&mut self) {
		if !self.topics.is_empty() {
			self.unsubscribe_all();
		}
	}
}
