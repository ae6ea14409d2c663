//! Connection-scoped publish/subscribe hub.
//!
//! Connections subscribe to named topics and publish messages to them. Every
//! connection gets its own bounded outbound queue drained by a dedicated
//! worker, so one slow peer never holds up the rest.

pub mod actor;
pub mod config;
pub mod core;
pub mod errors;
pub mod metrics;
pub mod session;
pub mod transport;
pub mod types;

pub use actor::DrainExit;
pub use config::HubConfig;
pub use core::conn::{Connection, ConnectionState, ConnectionStatus};
pub use core::hub::Hub;
pub use core::queue::EnqueueOutcome;
pub use core::router::FanOut;
pub use errors::{HubError, Result, TransportError};
pub use metrics::MetricsSnapshot;
pub use session::{Client, Handler, Session};
pub use transport::{ChannelTransport, Transport, TransportResult};
pub use types::{ConnectionId, Message, Topic};
