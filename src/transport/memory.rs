use anyhow::{bail, Result};
use tokio::sync::mpsc;
use tracing::debug;

use super::{ClientMessage, ServerMessage, Transport, TransportEvent};

/// In-process transport, paired with a [`MemoryServer`]
///
/// Used by tests and by applications that host the server side in-process.
pub struct MemoryTransport {
    inbound: Option<mpsc::Receiver<TransportEvent>>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    open: bool,
}

/// Server end of a [`MemoryTransport`]
pub struct MemoryServer {
    events: mpsc::Sender<TransportEvent>,
    received: mpsc::UnboundedReceiver<ClientMessage>,
}

impl MemoryTransport {
    pub fn pair() -> (MemoryTransport, MemoryServer) {
        let (event_tx, event_rx) = mpsc::channel(100);
        let (client_tx, client_rx) = mpsc::unbounded_channel();

        let transport = MemoryTransport {
            inbound: Some(event_rx),
            outbound: client_tx,
            open: false,
        };
        let server = MemoryServer {
            events: event_tx,
            received: client_rx,
        };

        (transport, server)
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>> {
        let Some(rx) = self.inbound.take() else {
            bail!("Memory transport already connected");
        };
        self.open = true;
        Ok(rx)
    }

    async fn send(&mut self, message: ClientMessage) -> Result<()> {
        if !self.open {
            bail!("Memory transport is not open");
        }
        debug!("Memory transport send: {}", message.kind());
        if self.outbound.send(message).is_err() {
            bail!("Memory server dropped");
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

impl MemoryServer {
    /// Deliver a message to the client
    pub async fn send(&self, message: ServerMessage) -> Result<()> {
        if self.events.send(TransportEvent::Message(message)).await.is_err() {
            bail!("Client dropped");
        }
        Ok(())
    }

    /// Close the channel from the server side
    pub async fn close(&self, reason: Option<String>) -> Result<()> {
        if self.events.send(TransportEvent::Closed { reason }).await.is_err() {
            bail!("Client dropped");
        }
        Ok(())
    }

    /// Next message the client sent, waiting if none is queued
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        self.received.recv().await
    }

    /// Next message the client sent, if one is queued
    pub fn try_recv(&mut self) -> Option<ClientMessage> {
        self.received.try_recv().ok()
    }
}
