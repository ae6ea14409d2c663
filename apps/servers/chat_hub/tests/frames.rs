#[cfg(test)]
mod tests {
	use chat_hub::protocol::ServerMessage;
	use axum::extract::ws::Message as WsMessage;
	use chat_hub::websocket::{join, process_frame, read_frames, ReadOutcome};
	use chat_hub::{AppState, Config};
	use clap::Parser;
	use serde_json::json;
	use std::{sync::Arc, time::Duration};
	use tokio::sync::mpsc;
	use tokio_util::sync::CancellationToken;
	use ws_hub::{ChannelTransport, ConnectionId, Hub, Message, Topic};

	fn state(args: &[&str]) -> AppState {
		let mut argv = vec!["chat_hub"];
		argv.extend_from_slice(args);
		let config = Arc::new(Config::parse_from(argv));
		let hub = Hub::new(config.hub_config()).unwrap();
		AppState::build(config, hub, CancellationToken::new()).unwrap()
	}

	async fn next_frame(rx: &mut mpsc::Receiver<Arc<Message>>) -> ServerMessage {
		let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
		ServerMessage::from(msg.as_ref())
	}

	/// Join like a WebSocket client does and consume the welcome frame
	async fn connect(state: &AppState) -> (ConnectionId, mpsc::Receiver<Arc<Message>>) {
		let (transport, mut rx) = ChannelTransport::pair(64);
		let id = join(state, transport).await.unwrap();
		assert_eq!(
			next_frame(&mut rx).await,
			ServerMessage::Welcome {
				connection_id: id.to_string()
			}
		);
		(id, rx)
	}

	#[tokio::test]
	async fn test_welcome_is_first_frame_even_with_traffic() {
		let state = state(&[]);
		let (alice, _rx_alice) = connect(&state).await;
		let chat = Topic::new("chat").unwrap();

		// Chat traffic is already flowing while bob joins
		let chatter = {
			let hub = state.hub.clone();
			let chat = chat.clone();
			tokio::spawn(async move {
				for _ in 0..50 {
					hub.publish(&alice, &chat, "\"busy\"").unwrap();
					tokio::task::yield_now().await;
				}
			})
		};

		let (transport, mut rx_bob) = ChannelTransport::pair(256);
		let bob = join(&state, transport).await.unwrap();
		chatter.await.unwrap();

		assert_eq!(
			next_frame(&mut rx_bob).await,
			ServerMessage::Welcome {
				connection_id: bob.to_string()
			}
		);
		assert!(state.hub.is_subscribed(&bob, &chat));
	}

	#[tokio::test]
	async fn test_chat_is_relayed_to_everyone_with_suffix() {
		let state = state(&["--echo-suffix", " (from server)"]);
		let (alice, mut rx_alice) = connect(&state).await;
		let (_bob, mut rx_bob) = connect(&state).await;

		process_frame(&state, &alice, r#"{"type":"publish","topic":"chat","payload":"hello"}"#);

		for rx in [&mut rx_alice, &mut rx_bob] {
			match next_frame(rx).await {
				ServerMessage::Message { topic, from, payload, seq } => {
					assert_eq!(topic.as_str(), "chat");
					assert_eq!(from, Some(alice));
					assert_eq!(payload, json!("hello (from server)"));
					assert_eq!(seq, 1);
				}
				other => panic!("unexpected frame {other:?}"),
			}
		}
	}

	#[tokio::test]
	async fn test_subscribe_frame_adds_topic() {
		let state = state(&[]);
		let (id, _rx) = connect(&state).await;
		let news = Topic::new("news").unwrap();

		process_frame(&state, &id, r#"{"type":"subscribe","topic":"news"}"#);
		assert!(state.hub.is_subscribed(&id, &news));

		process_frame(&state, &id, r#"{"type":"unsubscribe","topic":"news"}"#);
		assert!(!state.hub.is_subscribed(&id, &news));
	}

	#[tokio::test]
	async fn test_ping_gets_pong() {
		let state = state(&[]);
		let (id, mut rx) = connect(&state).await;

		process_frame(&state, &id, r#"{"type":"ping"}"#);
		assert_eq!(next_frame(&mut rx).await, ServerMessage::Pong);
	}

	#[tokio::test]
	async fn test_bad_frames_are_answered_with_errors() {
		let state = state(&[]);
		let (id, mut rx) = connect(&state).await;
		let (_other, mut rx_other) = connect(&state).await;

		process_frame(&state, &id, "not json");
		assert!(matches!(next_frame(&mut rx).await, ServerMessage::Error { message } if message.starts_with("invalid frame")));

		process_frame(&state, &id, r#"{"type":"publish","topic":"hub:welcome","payload":"spoof"}"#);
		assert!(matches!(next_frame(&mut rx).await, ServerMessage::Error { message } if message.contains("reserved")));

		process_frame(&state, &id, r#"{"type":"subscribe","topic":"hub:error"}"#);
		assert!(matches!(next_frame(&mut rx).await, ServerMessage::Error { .. }));

		// Errors go to the sender only
		assert!(tokio::time::timeout(Duration::from_millis(100), rx_other.recv()).await.is_err());
	}

	#[tokio::test]
	async fn test_reading_stops_when_hub_drops_connection() {
		let state = state(&[]);
		let (id, rx) = connect(&state).await;

		// The peer stops reading but never closes its side
		drop(rx);
		state.hub.send_to(&id, &Topic::new("chat").unwrap(), "lost");

		let silent_peer = futures::stream::pending::<Result<WsMessage, axum::Error>>();
		let outcome = tokio::time::timeout(Duration::from_secs(2), read_frames(&state, &id, silent_peer)).await.unwrap();

		assert_eq!(outcome, ReadOutcome { reason: None, frames: 0 });
		assert!(state.hub.state(&id).is_none());
		assert_eq!(state.hub.connection_count(), 0);
	}

	#[tokio::test]
	async fn test_reading_reports_client_close() {
		let state = state(&[]);
		let (id, _rx) = connect(&state).await;

		let frames = futures::stream::iter(vec![Ok(WsMessage::Text(r#"{"type":"ping"}"#.to_string())), Ok(WsMessage::Close(None))]);
		let outcome = read_frames(&state, &id, frames).await;

		assert_eq!(
			outcome,
			ReadOutcome {
				reason: Some("client closed"),
				frames: 1
			}
		);
	}
}
