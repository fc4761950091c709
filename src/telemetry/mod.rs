//! Best-effort telemetry channel.
//!
//! Spread lines are published to a WebSocket publish server as
//! `{"seq":0,"cmd":"publish","topic":..,"data":..}` text frames. Publishing
//! never blocks and never fails the caller: a full or closed channel only
//! drops the message.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

const PUBLISH_BUFFER: usize = 256;

/// Sink for human-readable telemetry lines.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Fire-and-forget publish.
    async fn publish(&self, topic: &str, message: &str);

    /// Release the underlying connection.
    async fn close(&self) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    seq: u64,
    cmd: &'a str,
    topic: &'a str,
    data: &'a str,
}

/// Package a publish command for the publish server.
pub fn package_publish(topic: &str, message: &str) -> Result<String> {
    serde_json::to_string(&PublishRequest {
        seq: 0,
        cmd: "publish",
        topic,
        data: message,
    })
    .context("Failed to encode publish request")
}

/// Discards everything.
pub struct NullPublisher;

#[async_trait]
impl Publisher for NullPublisher {
    async fn publish(&self, _topic: &str, _message: &str) {}

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Keeps published messages in memory.
#[derive(Default)]
pub struct MemoryPublisher {
    messages: RwLock<Vec<(String, String)>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(topic, message)` pairs in publish order.
    pub async fn messages(&self) -> Vec<(String, String)> {
        self.messages.read().await.clone()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, topic: &str, message: &str) {
        self.messages
            .write()
            .await
            .push((topic.to_string(), message.to_string()));
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Publishes over a WebSocket connection.
pub struct WebSocketPublisher {
    tx: Mutex<Option<mpsc::Sender<String>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WebSocketPublisher {
    /// Connect to the publish server.
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to telemetry server: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to telemetry server")?;
        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<String>(PUBLISH_BUFFER);

        let writer = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(e) = write.send(Message::text(text)).await {
                    warn!("Failed to write telemetry message: {}", e);
                    return;
                }
            }
            let _ = write.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => debug!("Telemetry server message: {}", text),
                    Ok(Message::Close(_)) => {
                        info!("Telemetry connection closed by server");
                        return;
                    }
                    Err(e) => {
                        warn!("Telemetry read error: {}", e);
                        return;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            tasks: Mutex::new(vec![writer, reader]),
        })
    }
}

#[async_trait]
impl Publisher for WebSocketPublisher {
    async fn publish(&self, topic: &str, message: &str) {
        let packaged = match package_publish(topic, message) {
            Ok(packaged) => packaged,
            Err(e) => {
                warn!("{:#}", e);
                return;
            }
        };

        if let Some(tx) = self.tx.lock().await.as_ref() {
            if let Err(e) = tx.try_send(packaged) {
                debug!(%topic, "Telemetry message dropped: {}", e);
            }
        }
    }

    async fn close(&self) -> Result<()> {
        // Dropping the sender lets the writer flush and send a close frame
        self.tx.lock().await.take();

        let mut tasks = self.tasks.lock().await;
        if let Some(reader) = tasks.pop() {
            reader.abort();
        }
        if let Some(writer) = tasks.pop() {
            writer.await.context("Telemetry writer task failed")?;
        }
        info!("Telemetry connection closed");
        Ok(())
    }
}
