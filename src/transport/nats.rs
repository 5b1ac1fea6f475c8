use anyhow::{bail, Context, Result};
use async_nats::Client;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ClientMessage, ServerMessage, Transport, TransportEvent};

/// Interview channel carried over NATS subjects
///
/// Client messages are published on `interview.{id}.client`; the server
/// answers on `interview.{id}.server`. Payloads are the same JSON documents
/// the WebSocket transport carries.
pub struct NatsTransport {
    url: String,
    channel_id: String,
    client: Option<Client>,
    forwarder: Option<JoinHandle<()>>,
}

impl NatsTransport {
    pub fn new(url: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            channel_id: channel_id.into(),
            client: None,
            forwarder: None,
        }
    }

    pub fn client_subject(&self) -> String {
        format!("interview.{}.client", self.channel_id)
    }

    pub fn server_subject(&self) -> String {
        format!("interview.{}.server", self.channel_id)
    }
}

#[async_trait::async_trait]
impl Transport for NatsTransport {
    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>> {
        if self.client.is_some() {
            bail!("Already connected");
        }

        info!("Connecting to NATS at {}", self.url);

        let client = async_nats::connect(self.url.as_str())
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        let subject = self.server_subject();
        let mut subscriber = client
            .subscribe(subject.clone())
            .await
            .context("Failed to subscribe to server subject")?;

        info!("Subscribed to {}", subject);

        let (event_tx, event_rx) = mpsc::channel(100);

        let forwarder = tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                match serde_json::from_slice::<ServerMessage>(&msg.payload) {
                    Ok(message) => {
                        debug!("Received {} on {}", message.kind(), subject);
                        if event_tx.send(TransportEvent::Message(message)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("Failed to parse server message: {}", e),
                }
            }

            let _ = event_tx
                .send(TransportEvent::Closed {
                    reason: Some("Subscription ended".to_string()),
                })
                .await;
        });

        self.client = Some(client);
        self.forwarder = Some(forwarder);

        Ok(event_rx)
    }

    async fn send(&mut self, message: ClientMessage) -> Result<()> {
        let Some(client) = &self.client else {
            bail!("Not connected");
        };

        let subject = self.client_subject();
        let payload = serde_json::to_vec(&message)?;
        let bytes = payload.len();

        client
            .publish(subject.clone(), payload.into())
            .await
            .with_context(|| format!("Failed to publish {}", message.kind()))?;

        debug!("Published {} to {} ({} bytes)", message.kind(), subject, bytes);

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }

        if let Some(client) = self.client.take() {
            info!("Closing NATS connection");
            client.flush().await.context("Failed to flush NATS connection")?;
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "nats"
    }
}
