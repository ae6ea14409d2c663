use super::queue::{DeliveryQueue, EnqueueOutcome};
use crate::types::{ConnectionId, Message, Topic};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::Serialize;
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, warn};

/// Outcome of fanning one message out to a topic's subscribers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanOut {
	/// Subscribers in the snapshot taken at publish time
	pub attempted: usize,
	pub enqueued: usize,
	/// Recipients whose queue was full
	pub dropped: usize,
	/// Recipients that disappeared between snapshot and enqueue
	pub stale: usize,
}

impl FanOut {
	/// Number of deliveries actually queued
	#[must_use]
	pub const fn delivery_count(&self) -> usize {
		self.enqueued
	}
}

/// Maps topics to their subscriber sets and performs fan-out.
///
/// A topic exists only while it has at least one subscriber: it is created on
/// first subscribe and removed, under the same shard lock, on last unsubscribe.
#[derive(Debug, Default)]
pub struct TopicRouter {
	topics: DashMap<Topic, HashSet<ConnectionId>>,
}

impl TopicRouter {
	#[must_use]
	pub fn new() -> Self {
		Self { topics: DashMap::new() }
	}

	/// Add `connection` to `topic`. Returns `false` if it was already subscribed.
	pub fn subscribe(&self, connection: ConnectionId, topic: &Topic) -> bool {
		let added = self.topics.entry(topic.clone()).or_default().insert(connection);
		if added {
			debug!(connection_id = %connection, topic = %topic, "Subscribed");
		}
		added
	}

	/// Remove `connection` from `topic`. Returns `false` if it was not subscribed.
	pub fn unsubscribe(&self, connection: &ConnectionId, topic: &Topic) -> bool {
		let Entry::Occupied(mut entry) = self.topics.entry(topic.clone()) else {
			return false;
		};

		let removed = entry.get_mut().remove(connection);
		if entry.get().is_empty() {
			entry.remove();
			debug!(topic = %topic, "Topic has no subscribers left, removed");
		}
		if removed {
			debug!(connection_id = %connection, topic = %topic, "Unsubscribed");
		}
		removed
	}

	/// Remove `connection` from every topic in `topics`. Returns how many sets it left.
	pub fn remove_connection<'a, I>(&self, connection: &ConnectionId, topics: I) -> usize
	where
		I: IntoIterator<Item = &'a Topic>,
	{
		topics.into_iter().filter(|topic| self.unsubscribe(connection, topic)).count()
	}

	/// Copy of the current subscriber set of `topic`
	#[must_use]
	pub fn subscribers(&self, topic: &Topic) -> Vec<ConnectionId> {
		self.topics.get(topic).map(|set| set.iter().copied().collect()).unwrap_or_default()
	}

	#[must_use]
	pub fn subscriber_count(&self, topic: &Topic) -> usize {
		self.topics.get(topic).map_or(0, |set| set.len())
	}

	#[must_use]
	pub fn is_subscribed(&self, connection: &ConnectionId, topic: &Topic) -> bool {
		self.topics.get(topic).is_some_and(|set| set.contains(connection))
	}

	#[must_use]
	pub fn contains_topic(&self, topic: &Topic) -> bool {
		self.topics.contains_key(topic)
	}

	#[must_use]
	pub fn topics(&self) -> Vec<Topic> {
		self.topics.iter().map(|entry| entry.key().clone()).collect()
	}

	#[must_use]
	pub fn topic_count(&self) -> usize {
		self.topics.len()
	}

	/// Fan `message` out to every subscriber of its topic.
	///
	/// The subscriber set is copied under the read lock and the lock released
	/// before any enqueue, so concurrent (un)subscribes never block on, or get
	/// observed half-way by, a fan-out. A failure for one recipient never stops
	/// delivery to the others.
	pub fn publish(&self, message: &Arc<Message>, queue: &DeliveryQueue) -> FanOut {
		let snapshot = self.subscribers(message.topic());
		let mut fan_out = FanOut {
			attempted: snapshot.len(),
			..FanOut::default()
		};

		for recipient in snapshot {
			match queue.enqueue(&recipient, Arc::clone(message)) {
				EnqueueOutcome::Enqueued => fan_out.enqueued += 1,
				EnqueueOutcome::Dropped => fan_out.dropped += 1,
				EnqueueOutcome::NoSuchConnection => fan_out.stale += 1,
			}
		}

		if fan_out.dropped > 0 || fan_out.stale > 0 {
			warn!(
				topic = %message.topic(),
				attempted = fan_out.attempted,
				dropped = fan_out.dropped,
				stale = fan_out.stale,
				"Fan-out incomplete"
			);
		}

		fan_out
	}
}
