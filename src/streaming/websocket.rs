// Copyright (c) 2026 QuakeWatch Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/quakewatch/quakewatch-rs

//! WebSocket push server for live dashboards.
//!
//! Sample broadcasts are rate-controlled per client: every client starts at
//! 10 Hz, is slowed by one Hz for each failed send (floored at 2 Hz after
//! repeated failures), and is sped back up by the periodic good-performance
//! adaptation tick (ceiling 15 Hz). Event and status messages bypass the
//! rate gate. A client whose channel closes is pruned from the registry.

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Default per-client sample rate in Hz.
const DEFAULT_RATE_HZ: u32 = 10;
/// Per-client rate floor in Hz.
const RATE_FLOOR_HZ: u32 = 2;
/// Per-client rate ceiling in Hz.
const RATE_CEILING_HZ: u32 = 15;
/// Failures after which the rate floor is applied outright.
const FAILURE_FLOOR_COUNT: u32 = 3;
/// Good-performance adaptation tick interval.
const ADAPTATION_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
enum WsOutbound {
    Sample(String),
    Event(String),
    Status(String),
}

struct ClientInfo {
    addr: SocketAddr,
    preferred_rate_hz: u32,
    failures: u32,
    last_sample_sent: Instant,
}

impl ClientInfo {
    fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            preferred_rate_hz: DEFAULT_RATE_HZ,
            failures: 0,
            last_sample_sent: Instant::now() - Duration::from_secs(1),
        }
    }

    /// Minimum interval between sample sends for this client.
    fn min_interval(&self) -> Duration {
        let rate = self.preferred_rate_hz.clamp(RATE_FLOOR_HZ, RATE_CEILING_HZ);
        Duration::from_millis(1000 / u64::from(rate))
    }

    fn sample_due(&self, now: Instant) -> bool {
        now.duration_since(self.last_sample_sent) >= self.min_interval()
    }

    /// A failed send slows the client down; repeated failures pin it at
    /// the floor until the adaptation tick recovers it.
    fn record_failure(&mut self) {
        self.failures += 1;
        self.preferred_rate_hz = if self.failures >= FAILURE_FLOOR_COUNT {
            RATE_FLOOR_HZ
        } else {
            (self.preferred_rate_hz.saturating_sub(1)).max(RATE_FLOOR_HZ)
        };
    }

    fn recover(&mut self) {
        self.preferred_rate_hz = (self.preferred_rate_hz + 1).min(RATE_CEILING_HZ);
        self.failures = 0;
    }
}

/// WebSocket push server handle.
pub struct WsServer {
    port: u16,
    max_clients: usize,
    clients: Arc<RwLock<HashMap<String, ClientInfo>>>,
    client_count: Arc<AtomicUsize>,
    streaming_enabled: Arc<AtomicBool>,
    latest_status: Arc<RwLock<String>>,
    broadcast_tx: broadcast::Sender<WsOutbound>,
}

impl WsServer {
    /// Create a server; nothing listens until [`WsServer::start`].
    pub fn new(port: u16, max_clients: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(256);
        Self {
            port,
            max_clients,
            clients: Arc::new(RwLock::new(HashMap::new())),
            client_count: Arc::new(AtomicUsize::new(0)),
            streaming_enabled: Arc::new(AtomicBool::new(true)),
            latest_status: Arc::new(RwLock::new("{}".to_string())),
            broadcast_tx,
        }
    }

    /// Bind the listener and spawn the accept loop plus the adaptation tick.
    pub async fn start(&self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("WebSocket server listening on ws://{}", addr);

        let clients = self.clients.clone();
        let client_count = self.client_count.clone();
        let streaming = self.streaming_enabled.clone();
        let latest_status = self.latest_status.clone();
        let broadcast_tx = self.broadcast_tx.clone();
        let max_clients = self.max_clients;

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if client_count.load(Ordering::Relaxed) >= max_clients {
                            warn!("max push clients reached, rejecting {}", addr);
                            continue;
                        }
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            clients.clone(),
                            client_count.clone(),
                            streaming.clone(),
                            latest_status.clone(),
                            broadcast_tx.subscribe(),
                        ));
                    }
                    Err(e) => warn!("accept error: {}", e),
                }
            }
        });

        // Good-performance tick: with few clients connected, slowly restore
        // per-client rates reduced by earlier send failures.
        let clients = self.clients.clone();
        let client_count = self.client_count.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(ADAPTATION_INTERVAL).await;
                if client_count.load(Ordering::Relaxed) <= 2 {
                    let mut clients = clients.write().await;
                    for info in clients.values_mut() {
                        info.recover();
                    }
                }
            }
        });

        Ok(())
    }

    /// Broadcast a sensor-data message, subject to per-client rate gates.
    pub fn broadcast_sample<T: Serialize>(&self, payload: &T) -> Result<()> {
        let json = serde_json::to_string(payload)?;
        let _ = self.broadcast_tx.send(WsOutbound::Sample(json));
        Ok(())
    }

    /// Broadcast a seismic-event message to every client.
    pub fn broadcast_event<T: Serialize>(&self, payload: &T) -> Result<()> {
        let json = serde_json::to_string(payload)?;
        let _ = self.broadcast_tx.send(WsOutbound::Event(json));
        Ok(())
    }

    /// Broadcast a status snapshot and keep it for `get_status` requests.
    pub async fn broadcast_status<T: Serialize>(&self, payload: &T) -> Result<()> {
        let json = serde_json::to_string(payload)?;
        *self.latest_status.write().await = json.clone();
        let _ = self.broadcast_tx.send(WsOutbound::Status(json));
        Ok(())
    }

    /// Connected push clients.
    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Relaxed)
    }

    /// Whether real-time sample streaming is enabled.
    pub fn streaming_enabled(&self) -> bool {
        self.streaming_enabled.load(Ordering::Relaxed)
    }
}

/// Build the reply for a streaming-control command, or `None` for
/// `get_status` which needs the latest snapshot instead.
fn command_reply(command: &str, streaming: &AtomicBool) -> Option<String> {
    match command {
        "start_streaming" => {
            streaming.store(true, Ordering::Relaxed);
            Some(r#"{"type":"response","message":"Real-time streaming started"}"#.to_string())
        }
        "stop_streaming" => {
            streaming.store(false, Ordering::Relaxed);
            Some(r#"{"type":"response","message":"Real-time streaming stopped"}"#.to_string())
        }
        "get_status" => None,
        other => Some(format!(
            r#"{{"type":"error","message":"Unknown command: {}"}}"#,
            other
        )),
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    clients: Arc<RwLock<HashMap<String, ClientInfo>>>,
    client_count: Arc<AtomicUsize>,
    streaming: Arc<AtomicBool>,
    latest_status: Arc<RwLock<String>>,
    mut broadcast_rx: broadcast::Receiver<WsOutbound>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let client_id = uuid::Uuid::new_v4().to_string();
    info!("push client connected from {} (id: {})", addr, client_id);
    {
        let mut clients = clients.write().await;
        clients.insert(client_id.clone(), ClientInfo::new(addr));
    }
    let count = client_count.fetch_add(1, Ordering::Relaxed) + 1;

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let welcome = format!(
        r#"{{"type":"status","message":"Connected to seismograph","clients":{}}}"#,
        count
    );
    if ws_sender.send(Message::Text(welcome)).await.is_err() {
        warn!("failed to greet {}", addr);
    }

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("push client {} sent: {}", addr, text);
                        let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
                            let _ = ws_sender
                                .send(Message::Text(
                                    r#"{"type":"error","message":"Invalid JSON"}"#.to_string(),
                                ))
                                .await;
                            continue;
                        };
                        let command = value["command"].as_str().unwrap_or("");
                        let reply = match command_reply(command, &streaming) {
                            Some(reply) => reply,
                            None => latest_status.read().await.clone(),
                        };
                        if ws_sender.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("push client {} closed", addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_sender.send(Message::Pong(data)).await;
                    }
                    Some(Err(e)) => {
                        warn!("push client {} error: {}", addr, e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            out = broadcast_rx.recv() => {
                match out {
                    Ok(WsOutbound::Sample(json)) => {
                        if !streaming.load(Ordering::Relaxed) {
                            continue;
                        }
                        let now = Instant::now();
                        let due = {
                            let clients = clients.read().await;
                            clients.get(&client_id).map(|c| c.sample_due(now)).unwrap_or(false)
                        };
                        if !due {
                            continue;
                        }
                        if ws_sender.send(Message::Text(json)).await.is_err() {
                            let mut clients = clients.write().await;
                            if let Some(info) = clients.get_mut(&client_id) {
                                info.record_failure();
                                debug!(
                                    "send failed to {}; rate now {} Hz",
                                    addr, info.preferred_rate_hz
                                );
                            }
                            break;
                        }
                        let mut clients = clients.write().await;
                        if let Some(info) = clients.get_mut(&client_id) {
                            info.last_sample_sent = now;
                        }
                    }
                    Ok(WsOutbound::Event(json)) | Ok(WsOutbound::Status(json)) => {
                        if ws_sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("push client {} lagged, skipped {} messages", addr, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    // Prune the registry entry when the channel closes.
    {
        let mut clients = clients.write().await;
        clients.remove(&client_id);
    }
    client_count.fetch_sub(1, Ordering::Relaxed);
    info!("push client {} disconnected", addr);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    #[test]
    fn test_default_rate_and_interval() {
        let info = ClientInfo::new(test_addr());
        assert_eq!(info.preferred_rate_hz, 10);
        assert_eq!(info.min_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_failures_slow_the_client_to_the_floor() {
        let mut info = ClientInfo::new(test_addr());
        info.record_failure();
        assert_eq!(info.preferred_rate_hz, 9);
        info.record_failure();
        assert_eq!(info.preferred_rate_hz, 8);
        // Third failure applies the floor outright.
        info.record_failure();
        assert_eq!(info.preferred_rate_hz, RATE_FLOOR_HZ);
        assert_eq!(info.min_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_recovery_is_capped_at_the_ceiling() {
        let mut info = ClientInfo::new(test_addr());
        for _ in 0..20 {
            info.recover();
        }
        assert_eq!(info.preferred_rate_hz, RATE_CEILING_HZ);
    }

    #[test]
    fn test_sample_due_respects_interval() {
        let mut info = ClientInfo::new(test_addr());
        let now = Instant::now();
        assert!(info.sample_due(now));
        info.last_sample_sent = now;
        assert!(!info.sample_due(now + Duration::from_millis(50)));
        assert!(info.sample_due(now + Duration::from_millis(100)));
    }

    #[test]
    fn test_command_replies() {
        let streaming = AtomicBool::new(false);
        let reply = command_reply("start_streaming", &streaming).unwrap();
        assert!(reply.contains("started"));
        assert!(streaming.load(Ordering::Relaxed));

        let reply = command_reply("stop_streaming", &streaming).unwrap();
        assert!(reply.contains("stopped"));
        assert!(!streaming.load(Ordering::Relaxed));

        assert!(command_reply("get_status", &streaming).is_none());
        let reply = command_reply("self_destruct", &streaming).unwrap();
        assert!(reply.contains("error"));
    }
}
