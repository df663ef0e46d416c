//! Live snapshot WebSocket server.
//!
//! Each connection receives:
//! - a `hello` message on connect
//! - the current Latest Snapshot as `new_data`
//! - every snapshot published after a stored record
//!
//! Clients may send `{"request": "snapshot"}` to get the current snapshot
//! again.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use etherspy_protocol::{
    decode_client_message, encode_server_message, ClientMessage, HelloMessage, ServerMessage,
};

use crate::broadcast::Snapshot;
use crate::pipeline::IngestPipeline;
use crate::shutdown::Shutdown;
use crate::stats::StatisticsCollector;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Configuration for the live server.
#[derive(Debug, Clone)]
pub struct LiveServerConfig {
    /// Server name sent in Hello message.
    pub name: String,
    /// Version sent in Hello message.
    pub version: String,
    /// Address to bind to.
    pub bind_addr: SocketAddr,
}

impl Default for LiveServerConfig {
    fn default() -> Self {
        Self {
            name: "etherspy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5001)),
        }
    }
}

/// The live WebSocket server.
pub struct LiveServer {
    config: LiveServerConfig,
    pipeline: IngestPipeline,
}

impl LiveServer {
    pub fn new(config: LiveServerConfig, pipeline: IngestPipeline) -> Self {
        Self { config, pipeline }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), BoxError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.run_with_listener(listener, shutdown).await
    }

    /// Serve on an already-bound listener until shutdown.
    pub async fn run_with_listener(self, listener: TcpListener, mut shutdown: Shutdown) -> Result<(), BoxError> {
        info!("Live server listening on {}", listener.local_addr()?);
        let config = Arc::new(self.config);

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.wait() => break,
            };

            match accepted {
                Ok((stream, addr)) => {
                    let config = config.clone();
                    let pipeline = self.pipeline.clone();
                    let snapshots = pipeline.broadcaster().subscribe();
                    let shutdown = shutdown.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, config, pipeline, snapshots, shutdown).await {
                            error!("Connection error from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }

        info!("Live server stopped");
        Ok(())
    }
}

/// Decrements the live client count when the connection ends.
struct ClientGuard(Arc<StatisticsCollector>);

impl ClientGuard {
    fn new(stats: Arc<StatisticsCollector>) -> Self {
        stats.client_connected();
        Self(stats)
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.0.client_disconnected();
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    config: Arc<LiveServerConfig>,
    pipeline: IngestPipeline,
    mut snapshots: broadcast::Receiver<Snapshot>,
    mut shutdown: Shutdown,
) -> Result<(), BoxError> {
    debug!("New connection from {}", addr);
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let _guard = ClientGuard::new(pipeline.stats().clone());
    info!("Live client {} connected", addr);

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let hello = HelloMessage::new(&config.name, &config.version);
    ws_tx
        .send(Message::Text(encode_server_message(&ServerMessage::Hello(hello))?))
        .await?;
    send_current_snapshot(&pipeline, &mut ws_tx).await?;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match decode_client_message(&text) {
                        Ok(ClientMessage::Snapshot) => send_current_snapshot(&pipeline, &mut ws_tx).await?,
                        Err(e) => debug!("Ignoring message from {}: {}", addr, e),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        ws_tx.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Live client {} closed connection", addr);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => {
                        info!("Live client {} disconnected", addr);
                        break;
                    }
                    _ => {}
                }
            }

            snapshot = snapshots.recv() => {
                match snapshot {
                    Ok(snapshot) => {
                        let msg = encode_server_message(&ServerMessage::NewData(snapshot.as_ref().clone()))?;
                        if let Err(e) = ws_tx.send(Message::Text(msg)).await {
                            debug!("Failed to send snapshot to {}: {}", addr, e);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Live client {} skipped {} snapshots", addr, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = shutdown.wait() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    Ok(())
}

/// Send the current snapshot. A store failure is logged and skipped.
async fn send_current_snapshot(pipeline: &IngestPipeline, ws_tx: &mut WsSink) -> Result<(), BoxError> {
    match pipeline.latest().await {
        Ok(records) => {
            let msg = encode_server_message(&ServerMessage::NewData(records))?;
            ws_tx.send(Message::Text(msg)).await?;
        }
        Err(e) => {
            error!("Failed to query latest snapshot: {}", e);
            pipeline.stats().record_store_failure();
        }
    }
    Ok(())
}
