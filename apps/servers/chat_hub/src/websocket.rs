use crate::error::ServerError;
use crate::metrics::{record_fan_out, record_frame, WS_CONNECTIONS_TOTAL};
use crate::protocol::{is_reserved, with_suffix, ClientMessage, ServerMessage, ERROR_TOPIC, PONG_TOPIC, WELCOME_TOPIC};
use crate::AppState;
use async_trait::async_trait;
use axum::{
	extract::{
		ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
		ConnectInfo, State,
	},
	response::{IntoResponse, Response},
};
use futures::{
	sink::SinkExt,
	stream::{SplitSink, Stream, StreamExt},
};
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, info, warn};
use ws_hub::{ConnectionId, Message, Result as HubResult, Topic, Transport, TransportError, TransportResult};

/// Hub transport over the write half of an axum WebSocket
pub struct WsTransport {
	sink: SplitSink<WebSocket, WsMessage>,
}

impl WsTransport {
	#[must_use]
	pub const fn new(sink: SplitSink<WebSocket, WsMessage>) -> Self {
		Self { sink }
	}

	async fn send(&mut self, frame: &ServerMessage) -> TransportResult<()> {
		let text = serde_json::to_string(frame).map_err(|e| TransportError::WriteFailed(e.to_string()))?;
		self.sink.send(WsMessage::Text(text)).await.map_err(|e| TransportError::WriteFailed(e.to_string()))
	}
}

#[async_trait]
impl Transport for WsTransport {
	async fn handshake(&mut self) -> TransportResult<()> {
		self.send(&ServerMessage::Ping).await.map_err(|e| TransportError::HandshakeFailed(e.to_string()))
	}

	async fn write(&mut self, message: Arc<Message>) -> TransportResult<()> {
		self.send(&ServerMessage::from(message.as_ref())).await
	}

	async fn close(&mut self) {
		if let Err(e) = self.sink.close().await {
			debug!(error = %e, "WebSocket close failed");
		}
	}
}

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>, ConnectInfo(addr): ConnectInfo<SocketAddr>) -> Response {
	info!(peer = %addr, "Incoming WS request");

	if !state.hub.is_accepting() {
		return ServerError::ShuttingDown.into_response();
	}
	// Early hint only; the hub enforces the limit on connect
	if state.hub.connection_count() >= state.hub.config().max_connections {
		WS_CONNECTIONS_TOTAL.with_label_values(&["rejected"]).inc();
		return ServerError::AtCapacity.into_response();
	}

	ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// Orchestrates one WebSocket connection: registers it with the hub, reads
/// client frames until the peer goes away, then tears the connection down.
async fn handle_socket(socket: WebSocket, state: AppState, addr: SocketAddr) {
	let (sender, receiver) = socket.split();

	let id = match join(&state, WsTransport::new(sender)).await {
		Ok(id) => id,
		Err(err) => {
			WS_CONNECTIONS_TOTAL.with_label_values(&["rejected"]).inc();
			warn!(peer = %addr, error = %err, "WebSocket connection rejected");
			return;
		}
	};
	WS_CONNECTIONS_TOTAL.with_label_values(&["opened"]).inc();
	info!(connection_id = %id, peer = %addr, "WebSocket connection established");

	let ReadOutcome { reason, frames } = read_frames(&state, &id, receiver).await;

	// On server shutdown or a hub-side teardown the hub has already closed the connection
	if let Some(reason) = reason {
		state.hub.disconnect(&id, reason).await;
	}
	WS_CONNECTIONS_TOTAL.with_label_values(&["closed"]).inc();
	info!(connection_id = %id, frames = frames, "WebSocket connection finished");
}

/// Why the read loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
	/// Set when the peer went away; the caller still has to disconnect it.
	/// `None` when the server or the hub already closed the connection.
	pub reason: Option<&'static str>,
	pub frames: u64,
}

/// Read client frames until the peer leaves or the connection is closed on
/// the server side. A hub teardown after a failed write counts as the latter.
pub async fn read_frames<S>(state: &AppState, id: &ConnectionId, mut receiver: S) -> ReadOutcome
where
	S: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
{
	let mut frames = 0u64;
	let Some(mut status) = state.hub.watch(id) else {
		return ReadOutcome { reason: None, frames };
	};

	let reason = loop {
		let next = tokio::select! {
			() = state.shutdown.cancelled() => break None,
			changed = status.changed() => {
				if changed.is_err() || status.borrow().state.is_terminal() {
					debug!(connection_id = %id, "Hub closed the connection, stopping reads");
					break None;
				}
				continue;
			}
			next = receiver.next() => next,
		};

		match next {
			Some(Ok(WsMessage::Text(text))) => {
				frames += 1;
				process_frame(state, id, &text);
			}
			Some(Ok(WsMessage::Close(_))) | None => break Some("client closed"),
			Some(Ok(_)) => {}
			Some(Err(err)) => {
				warn!(connection_id = %id, error = %err, "WebSocket read failed");
				break Some("read error");
			}
		}
	};
	ReadOutcome { reason, frames }
}

/// Register a connection over `transport`, queue its welcome frame, then
/// subscribe it to the default topics. The welcome is queued before any
/// subscription exists, so it is always the first delivery.
///
/// # Errors
/// Whatever [`ws_hub::Hub::connect`] returns.
pub async fn join<T: Transport>(state: &AppState, transport: T) -> HubResult<ConnectionId> {
	let id = state.hub.connect(transport).await?;
	state.hub.send_to(&id, &WELCOME_TOPIC, id.to_string());
	for topic in state.default_topics.iter() {
		if let Err(err) = state.hub.subscribe(&id, topic) {
			warn!(connection_id = %id, topic = %topic, error = %err, "Default subscription failed");
		}
	}
	Ok(id)
}

/// Handle one text frame. Failures are reported back to the sender only.
pub fn process_frame(state: &AppState, id: &ConnectionId, text: &str) {
	let frame = match serde_json::from_str::<ClientMessage>(text) {
		Ok(frame) => frame,
		Err(err) => {
			let err = ServerError::from(err);
			record_frame("unknown", err.kind());
			reply_error(state, id, &err);
			return;
		}
	};

	let kind = frame.kind();
	match apply_frame(state, id, frame) {
		Ok(()) => record_frame(kind, "ok"),
		Err(err) => {
			record_frame(kind, err.kind());
			reply_error(state, id, &err);
		}
	}
}

fn apply_frame(state: &AppState, id: &ConnectionId, frame: ClientMessage) -> Result<(), ServerError> {
	match frame {
		ClientMessage::Subscribe { topic } => {
			ensure_public(&topic)?;
			state.hub.subscribe(id, &topic)?;
		}
		ClientMessage::Unsubscribe { topic } => {
			state.hub.unsubscribe(id, &topic)?;
		}
		ClientMessage::Publish { topic, payload } => {
			ensure_public(&topic)?;
			let payload = with_suffix(payload, state.config.echo_suffix.as_deref());
			let fan_out = state.hub.publish(id, &topic, serde_json::to_vec(&payload)?)?;
			record_fan_out(&fan_out);
		}
		ClientMessage::Ping => {
			state.hub.send_to(id, &PONG_TOPIC, "");
		}
	}
	Ok(())
}

fn ensure_public(topic: &Topic) -> Result<(), ServerError> {
	if is_reserved(topic) {
		return Err(ServerError::ReservedTopic(topic.to_string()));
	}
	Ok(())
}

fn reply_error(state: &AppState, id: &ConnectionId, err: &ServerError) {
	debug!(connection_id = %id, error = %err, "Rejecting client frame");
	state.hub.send_to(id, &ERROR_TOPIC, err.to_string());
}
