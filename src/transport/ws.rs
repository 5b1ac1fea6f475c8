use anyhow::{bail, Context, Result};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::{ClientMessage, ServerMessage, Transport, TransportEvent};

/// WebSocket connection to the interview server's `/ws` endpoint
pub struct WebSocketTransport {
    url: String,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            outbound: None,
            reader: None,
            writer: None,
        }
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>> {
        if self.outbound.is_some() {
            bail!("Already connected");
        }

        info!("Connecting to {}", self.url);

        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("Failed to connect to {}", self.url))?;

        info!("Connected to {}", self.url);

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, event_rx) = mpsc::channel(100);

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    error!("Failed to send WebSocket frame: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            debug!("WebSocket writer stopped");
        });

        let reader = tokio::spawn(async move {
            let reason = loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerMessage>(text.as_str()) {
                            Ok(msg) => {
                                debug!("Received {}", msg.kind());
                                if event_tx.send(TransportEvent::Message(msg)).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => warn!("Failed to parse server message: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| f.reason.as_str().to_string())
                            .filter(|r| !r.is_empty());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break None,
                }
            };

            info!("WebSocket closed{}", reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default());
            let _ = event_tx.send(TransportEvent::Closed { reason }).await;
        });

        self.outbound = Some(out_tx);
        self.reader = Some(reader);
        self.writer = Some(writer);

        Ok(event_rx)
    }

    async fn send(&mut self, message: ClientMessage) -> Result<()> {
        let Some(outbound) = &self.outbound else {
            bail!("Not connected");
        };

        let json = serde_json::to_string(&message)?;
        debug!("Sending {} ({} bytes)", message.kind(), json.len());

        outbound
            .send(Message::text(json))
            .map_err(|_| anyhow::anyhow!("WebSocket writer stopped"))?;

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(Message::Close(None));
        }

        if let Some(writer) = self.writer.take() {
            if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
                warn!("WebSocket writer did not stop in time");
            }
        }

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "websocket"
    }
}
