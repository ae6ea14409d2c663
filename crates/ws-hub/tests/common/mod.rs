#![allow(dead_code)]

use async_trait::async_trait;
use std::{
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};
use tokio::sync::{mpsc, Semaphore};
use ws_hub::{Message, Topic, Transport, TransportError, TransportResult};

pub const RECV_WAIT: Duration = Duration::from_secs(2);

pub fn topic(name: &str) -> Topic {
	Topic::new(name).expect("valid topic")
}

/// Receive the next written message, failing the test if none arrives in time
pub async fn next_message(rx: &mut mpsc::Receiver<Arc<Message>>) -> Arc<Message> {
	tokio::time::timeout(RECV_WAIT, rx.recv())
		.await
		.expect("timed out waiting for a delivery")
		.expect("transport receiver closed")
}

/// Assert nothing further is delivered within a short window
pub async fn assert_silent(rx: &mut mpsc::Receiver<Arc<Message>>) {
	if let Ok(Some(msg)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
		panic!("unexpected delivery on {}: {:?}", msg.topic(), msg.text());
	}
}

pub fn texts(messages: &[Arc<Message>]) -> Vec<String> {
	messages.iter().map(|m| m.text().unwrap_or_default().to_string()).collect()
}

/// Transport whose writes block until the test releases them
pub struct GatedTransport {
	started: mpsc::UnboundedSender<()>,
	release: Arc<Semaphore>,
	written: mpsc::UnboundedSender<Arc<Message>>,
}

pub struct Gate {
	pub started: mpsc::UnboundedReceiver<()>,
	pub release: Arc<Semaphore>,
	pub written: mpsc::UnboundedReceiver<Arc<Message>>,
}

impl Gate {
	/// Let `n` pending or future writes complete
	pub fn open(&self, n: usize) {
		self.release.add_permits(n);
	}

	pub async fn wait_started(&mut self) {
		tokio::time::timeout(RECV_WAIT, self.started.recv())
			.await
			.expect("write never started")
			.expect("transport dropped");
	}

	pub async fn next_written(&mut self) -> Arc<Message> {
		tokio::time::timeout(RECV_WAIT, self.written.recv())
			.await
			.expect("timed out waiting for a write")
			.expect("transport dropped")
	}
}

pub fn gated() -> (GatedTransport, Gate) {
	let (started_tx, started) = mpsc::unbounded_channel();
	let (written_tx, written) = mpsc::unbounded_channel();
	let release = Arc::new(Semaphore::new(0));
	(
		GatedTransport {
			started: started_tx,
			release: Arc::clone(&release),
			written: written_tx,
		},
		Gate { started, release, written },
	)
}

#[async_trait]
impl Transport for GatedTransport {
	async fn write(&mut self, message: Arc<Message>) -> TransportResult<()> {
		let _ = self.started.send(());
		let permit = self.release.acquire().await.map_err(|_| TransportError::Closed)?;
		permit.forget();
		self.written.send(message).map_err(|_| TransportError::Closed)
	}
}

/// Transport whose every write fails
pub struct FailingTransport;

#[async_trait]
impl Transport for FailingTransport {
	async fn write(&mut self, _message: Arc<Message>) -> TransportResult<()> {
		Err(TransportError::WriteFailed("peer reset".to_string()))
	}
}

/// Transport that never completes a write
pub struct StuckTransport;

#[async_trait]
impl Transport for StuckTransport {
	async fn write(&mut self, _message: Arc<Message>) -> TransportResult<()> {
		std::future::pending::<()>().await;
		Ok(())
	}
}

/// Transport that refuses its handshake
pub struct RejectingTransport;

#[async_trait]
impl Transport for RejectingTransport {
	async fn handshake(&mut self) -> TransportResult<()> {
		Err(TransportError::HandshakeFailed("protocol mismatch".to_string()))
	}

	async fn write(&mut self, _message: Arc<Message>) -> TransportResult<()> {
		Ok(())
	}
}

/// Transport whose handshake never answers
pub struct SilentTransport;

#[async_trait]
impl Transport for SilentTransport {
	async fn handshake(&mut self) -> TransportResult<()> {
		std::future::pending::<()>().await;
		Ok(())
	}

	async fn write(&mut self, _message: Arc<Message>) -> TransportResult<()> {
		Ok(())
	}
}

/// Transport whose handshake waits for the test to release it
pub struct HeldTransport {
	release: Arc<Semaphore>,
	closed: Arc<AtomicBool>,
}

pub struct HeldHandshake {
	pub release: Arc<Semaphore>,
	pub closed: Arc<AtomicBool>,
}

pub fn held() -> (HeldTransport, HeldHandshake) {
	let release = Arc::new(Semaphore::new(0));
	let closed = Arc::new(AtomicBool::new(false));
	(
		HeldTransport {
			release: Arc::clone(&release),
			closed: Arc::clone(&closed),
		},
		HeldHandshake { release, closed },
	)
}

#[async_trait]
impl Transport for HeldTransport {
	async fn handshake(&mut self) -> TransportResult<()> {
		let permit = self.release.acquire().await.map_err(|_| TransportError::Closed)?;
		permit.forget();
		Ok(())
	}

	async fn write(&mut self, _message: Arc<Message>) -> TransportResult<()> {
		Ok(())
	}

	async fn close(&mut self) {
		self.closed.store(true, Ordering::SeqCst);
	}
}
