//! Duplex channel to the interview server
//!
//! A transport connects once per interview, delivers inbound traffic as
//! [`TransportEvent`]s on a channel and sends outbound messages without
//! waiting for acknowledgement. It never reconnects on its own.

pub mod memory;
pub mod messages;
pub mod nats;
pub mod ws;

use anyhow::Result;
use tokio::sync::mpsc;

pub use memory::{MemoryServer, MemoryTransport};
pub use messages::{ClientMessage, ProviderSelection, ServerMessage};
pub use nats::NatsTransport;
pub use ws::WebSocketTransport;

/// Inbound traffic from the server
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(ServerMessage),
    /// Channel is gone; no further events follow
    Closed { reason: Option<String> },
}

/// Transport trait
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Open the channel
    ///
    /// Returns a receiver for inbound events. Resolves once the channel is open.
    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>>;

    /// Queue a message for sending (fire-and-forget)
    async fn send(&mut self, message: ClientMessage) -> Result<()>;

    /// Close the channel and release its resources
    async fn close(&mut self) -> Result<()>;

    /// Get transport name for logging
    fn name(&self) -> &str;
}
