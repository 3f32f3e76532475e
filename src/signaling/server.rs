use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Bytes, Message, Utf8Bytes};
use tracing::{debug, error, info, warn};

use super::actor::RelayHandle;
use super::config::ServerConfig;
use super::messages::{ClientMessage, RelayKind, ServerMessage};
use super::types::{ConnectionId, OutboundMessage, SignalingError};

pub struct SignalingServer {
    listener: TcpListener,
    handle: RelayHandle,
    config: ServerConfig,
}

impl SignalingServer {
    /// Bind the listener and start the room manager
    pub async fn bind(config: ServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Signaling server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            handle: RelayHandle::spawn(),
            config,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle onto the shared room state
    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    pub async fn run(self) -> std::io::Result<()> {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    continue;
                }
            };
            let handle = self.handle.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, handle, config).await {
                    error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handle: RelayHandle,
    config: ServerConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(config.outbound_queue.max(1));
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Message>();

    let conn = handle.connect(tx.clone()).await?;
    info!("WebSocket connection from {} as {}", addr, conn);

    let mut ping_interval = tokio::time::interval_at(
        Instant::now() + config.ping_interval,
        config.ping_interval,
    );
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<Instant> = None;

    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let ws_msg = Message::Text(msg.into_inner());
                    if ws_tx.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if ws_tx.send(ctrl_msg).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    loop {
        let pong_timeout = async {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_interval.tick() => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", addr);
                    break;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
                waiting_for_pong = true;
                pong_deadline = Some(Instant::now() + config.pong_timeout);
                debug!("Ping sent to {}", addr);
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", addr);
                break;
            }

            _ = &mut send_task => {
                warn!("Send to {} failed, treating as disconnected", addr);
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        if let Err(e) = handle_text_message(text, conn, &tx, &handle).await {
                            error!("Room manager unavailable for {}: {}", conn, e);
                            break;
                        }
                    }
                    Message::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", addr);
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", addr);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    if let Err(e) = handle.disconnect(conn).await {
        warn!("Cleanup of {} failed: {}", conn, e);
    }

    send_task.abort();
    info!("WebSocket disconnected: {} ({})", addr, conn);

    Ok(())
}

/// Only fails when the room manager itself is gone
async fn handle_text_message(
    text: Utf8Bytes,
    conn: ConnectionId,
    tx: &mpsc::Sender<OutboundMessage>,
    handle: &RelayHandle,
) -> Result<(), SignalingError> {
    let client_msg = match ClientMessage::parse(&text) {
        Ok(m) => m,
        Err(e) if e.is_silent() => {
            debug!("Dropping message from {}: {}", conn, e);
            return Ok(());
        }
        Err(e) => {
            warn!("Rejecting message from {}: {}", conn, e);
            match ServerMessage::error(e.to_string()).to_outbound() {
                Ok(out) => {
                    if tx.try_send(out).is_err() {
                        debug!("Outbound queue of {} unavailable, error reply dropped", conn);
                    }
                }
                Err(e) => warn!("Failed to serialize error reply: {}", e),
            }
            return Ok(());
        }
    };

    match client_msg {
        ClientMessage::CreateOrJoin { room_id, call_type } => {
            handle.create_or_join(conn, room_id, call_type).await?;
        }
        ClientMessage::Offer => {
            handle
                .relay(conn, RelayKind::Offer, OutboundMessage::new(text))
                .await?;
        }
        ClientMessage::Answer => {
            handle
                .relay(conn, RelayKind::Answer, OutboundMessage::new(text))
                .await?;
        }
        ClientMessage::Candidate => {
            handle
                .relay(conn, RelayKind::Candidate, OutboundMessage::new(text))
                .await?;
        }
        ClientMessage::Hangup => {
            handle.hangup(conn).await?;
        }
    }

    Ok(())
}
