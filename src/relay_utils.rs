//! Relay rendezvous internals.
//!
//! A single manager task owns the slot map behind an mpsc channel, so no
//! locking is needed and no shared mutable state crosses a slot boundary.
//! Once a sender and receiver meet on a slot the pair is handed to pipe
//! mode: two independent forwarder directions that move opaque frames
//! between the peers with bounded buffering. The relay never decrypts or
//! parses a transfer frame.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use crate::errors::{Error, Result};
use crate::protocol::{
    JoinRequest, JoinResponse, Role, REASON_PAIR_TIMEOUT, REASON_SLOT_BUSY,
};
use crate::session::CloseSignal;
use crate::{MAX_FRAME_BYTES, MAX_INFLIGHT_FRAMES, PAIR_TIMEOUT};

/// How long a fresh connection gets to produce its join line.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the join line; anything longer is garbage.
const MAX_JOIN_LINE: usize = 512;

/// Tunable relay limits. Defaults match the protocol constants; tests
/// shrink the timeouts.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub pair_timeout: Duration,
    pub sweep_interval: Duration,
    pub max_frame_bytes: usize,
    pub max_inflight_frames: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            pair_timeout: PAIR_TIMEOUT,
            sweep_interval: Duration::from_secs(30),
            max_frame_bytes: MAX_FRAME_BYTES,
            max_inflight_frames: MAX_INFLIGHT_FRAMES,
        }
    }
}

/// A connected peer that has sent its join line.
pub struct Peer {
    pub stream: TcpStream,
    pub addr: SocketAddr,
}

struct WaitingPeer {
    peer: Peer,
    role: Role,
    deadline: Instant,
}

pub enum Message {
    Join { peer: Peer, request: JoinRequest },
}

/// Owns the slot map. One instance, one task.
pub struct SlotManager {
    slots: HashMap<u16, WaitingPeer>,
    config: RelayConfig,
}

impl SlotManager {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            slots: HashMap::new(),
            config,
        }
    }

    async fn handle_join(&mut self, mut peer: Peer, request: JoinRequest) {
        match self.slots.entry(request.slot_id) {
            Entry::Occupied(occupied) if occupied.get().role == request.role => {
                info!(
                    "rejecting duplicate {:?} on slot {}",
                    request.role, request.slot_id
                );
                let _ = send_response(&mut peer.stream, &JoinResponse::error(REASON_SLOT_BUSY))
                    .await;
            }

            Entry::Occupied(occupied) => {
                let mut waiting = occupied.remove();

                // The waiting peer may have hung up while the slot sat idle;
                // if so, the newcomer takes its place.
                if !is_connection_alive(&mut waiting.peer.stream) {
                    debug!(
                        "waiting peer on slot {} disconnected, re-registering newcomer",
                        request.slot_id
                    );
                    self.register(peer, request).await;
                    return;
                }

                info!(
                    "pairing slot {}: {} <-> {}",
                    request.slot_id, waiting.peer.addr, peer.addr
                );
                let paired = JoinResponse::paired();
                if send_response(&mut waiting.peer.stream, &paired).await.is_err()
                    || send_response(&mut peer.stream, &paired).await.is_err()
                {
                    warn!("failed to notify pair on slot {}", request.slot_id);
                    return;
                }

                let config = self.config.clone();
                tokio::spawn(run_pipe(waiting.peer, peer, config));
            }

            Entry::Vacant(_) => {
                self.register(peer, request).await;
            }
        }
    }

    async fn register(&mut self, mut peer: Peer, request: JoinRequest) {
        if send_response(&mut peer.stream, &JoinResponse::waiting())
            .await
            .is_err()
        {
            return;
        }
        debug!(
            "registered {:?} from {} on slot {}",
            request.role, peer.addr, request.slot_id
        );
        self.slots.insert(
            request.slot_id,
            WaitingPeer {
                peer,
                role: request.role,
                deadline: Instant::now() + self.config.pair_timeout,
            },
        );
    }

    /// Expire waiting peers whose pairing deadline has elapsed.
    async fn sweep(&mut self) {
        let now = Instant::now();
        let expired: Vec<u16> = self
            .slots
            .iter()
            .filter(|(_, waiting)| waiting.deadline <= now)
            .map(|(slot, _)| *slot)
            .collect();

        for slot in expired {
            if let Some(mut waiting) = self.slots.remove(&slot) {
                info!("pair timeout on slot {}, disconnecting waiting peer", slot);
                let _ = send_response(
                    &mut waiting.peer.stream,
                    &JoinResponse::error(REASON_PAIR_TIMEOUT),
                )
                .await;
            }
        }
    }
}

/// Manager task: sole owner of the slot map.
pub async fn slot_manager_task(mut manager: SlotManager, mut inbox: mpsc::Receiver<Message>) {
    let mut sweeper = tokio::time::interval(manager.config.sweep_interval);
    loop {
        tokio::select! {
            message = inbox.recv() => match message {
                Some(Message::Join { peer, request }) => {
                    manager.handle_join(peer, request).await;
                }
                None => break,
            },
            _ = sweeper.tick() => manager.sweep().await,
        }
    }
}

/// Per-connection task: read the join line and hand the peer to the manager.
pub async fn handle_new_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    manager: mpsc::Sender<Message>,
) {
    let line = match timeout(JOIN_TIMEOUT, read_join_line(&mut stream)).await {
        Ok(Ok(line)) => line,
        Ok(Err(e)) => {
            debug!("dropping {}: {}", addr, e);
            return;
        }
        Err(_) => {
            debug!("dropping {}: no join line within {:?}", addr, JOIN_TIMEOUT);
            return;
        }
    };

    let request = match decode_join_request(&line) {
        Ok(request) => request,
        Err(e) => {
            debug!("dropping {}: {}", addr, e);
            let _ = send_response(&mut stream, &JoinResponse::error("invalid join")).await;
            return;
        }
    };

    let peer = Peer { stream, addr };
    if manager.send(Message::Join { peer, request }).await.is_err() {
        warn!("slot manager is gone, dropping connection from {}", addr);
    }
}

pub fn decode_join_request(line: &str) -> Result<JoinRequest> {
    serde_json::from_str(line.trim()).map_err(|e| Error::Protocol(format!("bad join line: {}", e)))
}

/// Read a single newline-terminated line byte by byte, so no bytes of the
/// framed phase that follows are consumed.
async fn read_join_line(stream: &mut TcpStream) -> Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let read = stream.read(&mut byte).await?;
        if read == 0 {
            return Err(Error::TransportClosed);
        }
        if byte[0] == b'\n' {
            return String::from_utf8(line)
                .map_err(|_| Error::Protocol("join line is not valid UTF-8".into()));
        }
        line.push(byte[0]);
        if line.len() > MAX_JOIN_LINE {
            return Err(Error::Protocol("join line too long".into()));
        }
    }
}

async fn send_response(stream: &mut TcpStream, response: &JoinResponse) -> Result<()> {
    let json = serde_json::to_string(response)
        .map_err(|e| Error::Protocol(format!("could not encode response: {}", e)))?;
    stream.write_all(json.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await?;
    Ok(())
}

/// Pipe mode: forward frames in both directions until either side closes.
async fn run_pipe(a: Peer, b: Peer, config: RelayConfig) {
    let (a_addr, b_addr) = (a.addr, b.addr);
    debug!("pipe started: {} <-> {}", a_addr, b_addr);

    let (a_read, a_write) = a.stream.into_split();
    let (b_read, b_write) = b.stream.into_split();
    let close = CloseSignal::new();

    let forward_ab = tokio::spawn(forward(a_read, b_write, config.clone(), close.clone()));
    let forward_ba = tokio::spawn(forward(b_read, a_write, config, close.clone()));

    let _ = tokio::join!(forward_ab, forward_ba);
    debug!("pipe closed: {} <-> {}", a_addr, b_addr);
}

/// One forwarding direction: a reader feeding a bounded channel drained by a
/// writer. The channel capacity is the per-direction in-flight frame limit;
/// when the slow side stalls, the channel fills and the reader stops reading.
async fn forward(
    mut source: OwnedReadHalf,
    mut sink: OwnedWriteHalf,
    config: RelayConfig,
    close: CloseSignal,
) {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(config.max_inflight_frames);

    let mut reader_close = close.clone();
    let max_frame = config.max_frame_bytes;
    let reader = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = reader_close.closed() => break,
                frame = read_pipe_frame(&mut source, max_frame) => match frame {
                    Ok(frame) => {
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        reader_close.trigger();
                        break;
                    }
                }
            }
        }
        // tx drops here; the writer below drains what is queued and exits.
    });

    // The writer ignores the close signal on purpose: frames already
    // accepted from the fast side must still reach the slow side before the
    // direction shuts down.
    while let Some(frame) = rx.recv().await {
        if write_pipe_frame(&mut sink, &frame).await.is_err() {
            break;
        }
    }
    close.trigger();

    let _ = reader.await;
    // Dropping the halves closes the sockets for both peers.
}

/// Read one opaque frame body. The body is never inspected.
async fn read_pipe_frame(source: &mut OwnedReadHalf, max_frame: usize) -> Result<Vec<u8>> {
    let len = match source.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::TransportClosed)
        }
        Err(e) => return Err(e.into()),
    };
    if len > max_frame {
        return Err(Error::Decode(format!(
            "relayed frame of {} bytes exceeds the frame limit",
            len
        )));
    }
    let mut body = vec![0u8; len];
    match source.read_exact(&mut body).await {
        Ok(_) => Ok(body),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::TransportClosed),
        Err(e) => Err(e.into()),
    }
}

async fn write_pipe_frame(sink: &mut OwnedWriteHalf, body: &[u8]) -> Result<()> {
    sink.write_u32(body.len() as u32).await?;
    sink.write_all(body).await?;
    sink.flush().await?;
    Ok(())
}

/// Check whether a TCP connection is still alive with a non-blocking probe.
/// Waiting peers send nothing until paired, so a readable byte here only
/// shows up on close or protocol abuse.
fn is_connection_alive(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 1];
    match stream.try_read(&mut buf) {
        Ok(0) => false,
        Ok(_) => true,
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => true,
        Err(_) => false,
    }
}

/// Accept loop: one handler task per connection, one manager task overall.
pub async fn run_relay(listener: TcpListener, config: RelayConfig) -> Result<()> {
    let (tx, rx) = mpsc::channel::<Message>(100);
    let manager = SlotManager::new(config);
    tokio::spawn(slot_manager_task(manager, rx));

    loop {
        let (stream, addr) = listener.accept().await?;
        debug!("client connected: {}", addr);
        tokio::spawn(handle_new_connection(stream, addr, tx.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JoinStatus;

    #[test]
    fn decode_join_request_accepts_wire_shape() {
        let request = decode_join_request(r#"{"slotId":7,"role":"receiver"}"#).unwrap();
        assert_eq!(request.slot_id, 7);
        assert_eq!(request.role, Role::Receiver);
    }

    #[test]
    fn decode_join_request_rejects_garbage() {
        assert!(decode_join_request("not json").is_err());
        assert!(decode_join_request(r#"{"slotId":7}"#).is_err());
        assert!(decode_join_request(r#"{"slotId":7,"role":"observer"}"#).is_err());
    }

    #[test]
    fn default_config_matches_protocol_constants() {
        let config = RelayConfig::default();
        assert_eq!(config.pair_timeout, PAIR_TIMEOUT);
        assert_eq!(config.max_frame_bytes, MAX_FRAME_BYTES);
        assert_eq!(config.max_inflight_frames, MAX_INFLIGHT_FRAMES);
    }

    #[test]
    fn join_response_reasons_roundtrip() {
        let busy: JoinResponse =
            serde_json::from_str(r#"{"status":"error","reason":"slot busy"}"#).unwrap();
        assert_eq!(busy.status, JoinStatus::Error);
        assert_eq!(busy.reason.as_deref(), Some(REASON_SLOT_BUSY));
    }
}
