mod common;

#[cfg(test)]
mod tests {
	use crate::common::{topic, RECV_WAIT};
	use serde::{Deserialize, Serialize};
	use std::{
		sync::{
			atomic::{AtomicUsize, Ordering},
			Arc,
		},
		time::Duration,
	};
	use tokio::sync::mpsc;
	use ws_hub::{ConnectionState, Hub, HubConfig, HubError, Message};

	#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
	struct ChatLine {
		user: String,
		text: String,
	}

	fn forward(tx: &mpsc::UnboundedSender<String>) -> impl Fn(&Message) + Send + Sync + 'static {
		let tx = tx.clone();
		move |msg: &Message| {
			let _ = tx.send(msg.text().unwrap_or_default().to_string());
		}
	}

	async fn recv(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
		tokio::time::timeout(RECV_WAIT, rx.recv()).await.unwrap().unwrap()
	}

	async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<String>) {
		if let Ok(Some(text)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
			panic!("unexpected delivery: {text}");
		}
	}

	#[tokio::test]
	async fn test_session_receives_published_messages() {
		let hub = Hub::new(HubConfig::default()).unwrap();
		let alice = hub.connect_local().await.unwrap();
		let bob = hub.connect_local().await.unwrap();
		let chat = topic("chat");
		let (tx, mut rx) = mpsc::unbounded_channel();

		let listener = alice.session();
		assert!(listener.subscribe(&chat, forward(&tx)).unwrap());

		bob.session().publish(&chat, "hello alice").unwrap();
		assert_eq!(recv(&mut rx).await, "hello alice");
		assert_eq!(listener.state(), ConnectionState::Open);
	}

	#[tokio::test]
	async fn test_subscribe_registers_handler_at_most_once() {
		let hub = Hub::new(HubConfig::default()).unwrap();
		let client = hub.connect_local().await.unwrap();
		let chat = topic("chat");
		let calls = Arc::new(AtomicUsize::new(0));

		let session = client.session();
		for _ in 0..3 {
			let calls = Arc::clone(&calls);
			session
				.subscribe(&chat, move |_: &Message| {
					calls.fetch_add(1, Ordering::SeqCst);
				})
				.unwrap();
		}

		let (tx, mut rx) = mpsc::unbounded_channel();
		let probe = client.session();
		probe.subscribe(&chat, forward(&tx)).unwrap();

		hub.broadcast(&chat, "ping");
		recv(&mut rx).await;
		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert_eq!(hub.subscribers(&chat), vec![client.id()]);
	}

	#[tokio::test]
	async fn test_release_only_removes_own_handlers() {
		let hub = Hub::new(HubConfig::default()).unwrap();
		let client = hub.connect_local().await.unwrap();
		let chat = topic("chat");
		let (tx_a, mut rx_a) = mpsc::unbounded_channel();
		let (tx_b, mut rx_b) = mpsc::unbounded_channel();

		let first = client.session();
		let second = client.session();
		first.subscribe(&chat, forward(&tx_a)).unwrap();
		second.subscribe(&chat, forward(&tx_b)).unwrap();

		first.release();

		// The connection stays subscribed for the remaining session
		assert!(hub.is_subscribed(&client.id(), &chat));
		hub.broadcast(&chat, "still here");
		assert_eq!(recv(&mut rx_b).await, "still here");
		assert_quiet(&mut rx_a).await;
	}

	#[tokio::test]
	async fn test_last_release_unsubscribes_connection() {
		let hub = Hub::new(HubConfig::default()).unwrap();
		let client = hub.connect_local().await.unwrap();
		let (chat, news) = (topic("chat"), topic("news"));
		let (tx, _rx) = mpsc::unbounded_channel();

		let session = client.session();
		session.subscribe(&chat, forward(&tx)).unwrap();
		session.subscribe(&news, forward(&tx)).unwrap();
		assert_eq!(hub.topic_count(), 2);

		assert_eq!(session.unsubscribe_all(), 2);
		assert!(session.topics().is_empty());
		assert_eq!(hub.topic_count(), 0);
		assert!(!session.unsubscribe(&chat));
	}

	#[tokio::test]
	async fn test_dropping_session_cleans_up() {
		let hub = Hub::new(HubConfig::default()).unwrap();
		let client = hub.connect_local().await.unwrap();
		let chat = topic("chat");
		let (tx, _rx) = mpsc::unbounded_channel();

		{
			let scoped = client.session();
			scoped.subscribe(&chat, forward(&tx)).unwrap();
			assert!(hub.is_subscribed(&client.id(), &chat));
		}

		assert!(!hub.is_subscribed(&client.id(), &chat));
		assert_eq!(hub.connection_count(), 1);
	}

	#[tokio::test]
	async fn test_typed_publish_and_receive() {
		let hub = Hub::new(HubConfig::default()).unwrap();
		let client = hub.connect_local().await.unwrap();
		let chat = topic("chat");
		let (tx, mut rx) = mpsc::unbounded_channel();

		let session = client.session();
		session
			.subscribe_json(&chat, move |line: ChatLine| {
				let _ = tx.send(line);
			})
			.unwrap();

		// Undecodable payloads are skipped, not fatal
		hub.broadcast(&chat, "not json");
		let line = ChatLine {
			user: "ada".to_string(),
			text: "hi".to_string(),
		};
		session.publish_json(&chat, &line).unwrap();

		let received = tokio::time::timeout(RECV_WAIT, rx.recv()).await.unwrap().unwrap();
		assert_eq!(received, line);
	}

	#[tokio::test]
	async fn test_closed_client_reports_state() {
		let hub = Hub::new(HubConfig::default()).unwrap();
		let client = hub.connect_local().await.unwrap();
		let session = client.session();

		assert!(client.close().await);

		assert_eq!(session.state(), ConnectionState::Closed);
		assert!(session.last_error().is_none());
		assert!(matches!(session.publish(&topic("chat"), "x"), Err(HubError::NoSuchConnection(_))));
		assert!(session.subscribe(&topic("chat"), |_: &Message| {}).is_err());
		assert!(session.topics().is_empty());
	}

	#[tokio::test]
	async fn test_closed_client_rejects_topics_other_sessions_hold() {
		let hub = Hub::new(HubConfig::default()).unwrap();
		let client = hub.connect_local().await.unwrap();
		let chat = topic("chat");

		let first = client.session();
		assert!(first.subscribe(&chat, |_: &Message| {}).unwrap());
		assert_eq!(client.handler_count(), 1);

		assert!(client.close().await);

		let second = client.session();
		assert!(second.subscribe(&chat, |_: &Message| {}).is_err());
		assert!(second.subscribe(&topic("news"), |_: &Message| {}).is_err());
		assert!(second.topics().is_empty());

		// Handlers of a closed client are released once its inbox winds down
		tokio::time::timeout(RECV_WAIT, async {
			while client.handler_count() > 0 {
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
		})
		.await
		.unwrap();
	}

	#[tokio::test]
	async fn test_dropping_last_client_handle_disconnects() {
		let hub = Hub::new(HubConfig::default()).unwrap();
		let client = hub.connect_local().await.unwrap();
		let id = client.id();

		drop(client);

		tokio::time::timeout(RECV_WAIT, async {
			while hub.state(&id).is_some() {
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
		})
		.await
		.unwrap();
		assert_eq!(hub.connection_count(), 0);
	}
}
