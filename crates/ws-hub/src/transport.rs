//! Transport seam
//!
//! The hub never frames bytes itself. Each connection is backed by a
//! [`Transport`] that provides ordered, reliable delivery to one peer
//! (a WebSocket, an in-process channel, a test double). The transport is
//! moved into the connection's drain worker on connect and is exclusively
//! owned by it until the connection closes.

use crate::errors::TransportError;
use crate::types::Message;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Per-connection outbound interface that every transport must satisfy.
#[async_trait]
pub trait Transport: Send + 'static {
	/// Called once while the connection is `Connecting`. Success moves it to `Open`.
	async fn handshake(&mut self) -> TransportResult<()> {
		Ok(())
	}

	/// Write one message to the peer. The caller bounds the wait.
	async fn write(&mut self, message: Arc<Message>) -> TransportResult<()>;

	/// Release the underlying resource. Called exactly once, after the last write.
	async fn close(&mut self) {}
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
	async fn handshake(&mut self) -> TransportResult<()> {
		(**self).handshake().await
	}

	async fn write(&mut self, message: Arc<Message>) -> TransportResult<()> {
		(**self).write(message).await
	}

	async fn close(&mut self) {
		(**self).close().await;
	}
}

/// In-process transport backed by a bounded mpsc channel.
///
/// A full channel makes `write` wait, which the drain worker bounds with its
/// write timeout. A dropped receiver surfaces as [`TransportError::Closed`].
#[derive(Debug)]
pub struct ChannelTransport {
	sender: mpsc::Sender<Arc<Message>>,
}

impl ChannelTransport {
	/// Create a transport and the receiving end that observes its writes.
	#[must_use]
	pub fn pair(buffer: usize) -> (Self, mpsc::Receiver<Arc<Message>>) {
		let (sender, receiver) = mpsc::channel(buffer.max(1));
		(Self { sender }, receiver)
	}
}

#[async_trait]
impl Transport for ChannelTransport {
	async fn handshake(&mut self) -> TransportResult<()> {
		if self.sender.is_closed() {
			return Err(TransportError::HandshakeFailed("receiver dropped".to_string()));
		}
		Ok(())
	}

	async fn write(&mut self, message: Arc<Message>) -> TransportResult<()> {
		self.sender.send(message).await.map_err(|_| TransportError::Closed)
	}
}
