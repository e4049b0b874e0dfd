//! Sender transfer engine.
//!
//! A single reader-loop task owns the state; transitions are keyed off
//! inbound control messages only, and the allowed (state, message) pairs are
//! checked at the loop boundary. Any mismatch triggers the two-stage
//! teardown: best-effort `TransferError` to the peer, close, typed error to
//! the caller.

use std::io::Read;

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::cryptography::Crypt;
use crate::errors::{Error, Result};
use crate::networking::{perform_pake, recv_frame, send_chunk, send_message, InboundFrame};
use crate::password::TransferPassword;
use crate::protocol::{MessageType, TransferMessage, TransferMetadata};
use crate::session::{CloseSignal, DataSource, Progress};
use crate::{MAX_CHUNK_BYTES, MAX_SEND_CHUNKS};

/// Sender protocol states, entered strictly top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Initial,
    WaitForHandshake,
    WaitForFileRequest,
    WaitForFileAck,
    WaitForCloseMessage,
    WaitForCloseAck,
    Terminated,
}

impl SenderState {
    pub fn name(self) -> &'static str {
        match self {
            SenderState::Initial => "Initial",
            SenderState::WaitForHandshake => "WaitForHandshake",
            SenderState::WaitForFileRequest => "WaitForFileRequest",
            SenderState::WaitForFileAck => "WaitForFileAck",
            SenderState::WaitForCloseMessage => "WaitForCloseMessage",
            SenderState::WaitForCloseAck => "WaitForCloseAck",
            SenderState::Terminated => "Terminated",
        }
    }
}

/// The state in which an inbound receiver message would be legal.
/// `None` for messages the receiver never sends.
fn expected_state(msg_type: MessageType) -> Option<SenderState> {
    match msg_type {
        MessageType::ReceiverHandshake => Some(SenderState::WaitForHandshake),
        MessageType::ReceiverRequestPayload => Some(SenderState::WaitForFileRequest),
        MessageType::ReceiverPayloadAck => Some(SenderState::WaitForFileAck),
        MessageType::ReceiverClosingAck => Some(SenderState::WaitForCloseAck),
        _ => None,
    }
}

/// Chunk size for a payload of the given size.
///
/// Large payloads cap the number of chunks near `MAX_SEND_CHUNKS` so
/// progress updates stay bounded; everything else streams in fixed
/// `MAX_CHUNK_BYTES` chunks.
pub fn chunk_size(payload_size: u64) -> u64 {
    if payload_size / MAX_CHUNK_BYTES > MAX_SEND_CHUNKS {
        payload_size / MAX_SEND_CHUNKS
    } else {
        MAX_CHUNK_BYTES
    }
}

/// Sender transfer engine. Owns the payload stream and drives the protocol
/// to `Terminated` on every path.
pub struct Sender {
    state: SenderState,
    password: TransferPassword,
    payload: DataSource,
    metadata: TransferMetadata,
    progress: mpsc::Sender<Progress>,
    close: CloseSignal,
}

impl Sender {
    pub fn new(
        password: TransferPassword,
        payload: DataSource,
        metadata: TransferMetadata,
        progress: mpsc::Sender<Progress>,
        close: CloseSignal,
    ) -> Self {
        Self {
            state: SenderState::Initial,
            password,
            payload,
            metadata,
            progress,
            close,
        }
    }

    /// Run the full sender protocol over an established transport.
    pub async fn run<R, W>(mut self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let session = perform_pake(&mut reader, &mut writer, &self.password).await?;
        let crypt = Crypt::new(&session);
        self.state = SenderState::WaitForHandshake;
        debug!("session key established, waiting for receiver handshake");

        let result = self.drive(&mut reader, &mut writer, &crypt).await;

        // Transport handles and key material drop here on every exit path.
        self.state = SenderState::Terminated;
        self.close.trigger();
        result
    }

    async fn drive<R, W>(&mut self, reader: &mut R, writer: &mut W, crypt: &Crypt) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut close = self.close.clone();
        loop {
            let frame = tokio::select! {
                _ = close.closed() => return Err(Error::Cancelled),
                frame = recv_frame(reader, crypt) => frame?,
            };

            let message = match frame {
                InboundFrame::Message(message) => message,
                InboundFrame::Chunk(_) => {
                    let _ = send_message(
                        writer,
                        crypt,
                        &TransferMessage::error("unexpected payload frame"),
                    )
                    .await;
                    return Err(Error::Protocol(
                        "receiver sent a payload frame to the sender".into(),
                    ));
                }
            };

            match (self.state, message.msg_type) {
                (SenderState::WaitForHandshake, MessageType::ReceiverHandshake) => {
                    let encoded = bincode::serialize(&self.metadata)
                        .map_err(|e| Error::Decode(e.to_string()))?;
                    send_message(
                        writer,
                        crypt,
                        &TransferMessage::new(MessageType::SenderHandshake, encoded),
                    )
                    .await?;
                    self.state = SenderState::WaitForFileRequest;
                }

                (SenderState::WaitForFileRequest, MessageType::ReceiverRequestPayload) => {
                    self.stream_payload(writer, crypt).await?;
                    send_message(
                        writer,
                        crypt,
                        &TransferMessage::new(
                            MessageType::SenderPayloadSent,
                            b"transfer complete".to_vec(),
                        ),
                    )
                    .await?;
                    self.state = SenderState::WaitForFileAck;
                }

                (SenderState::WaitForFileAck, MessageType::ReceiverPayloadAck) => {
                    self.state = SenderState::WaitForCloseMessage;
                    send_message(
                        writer,
                        crypt,
                        &TransferMessage::new(
                            MessageType::SenderClosing,
                            b"closing down as requested".to_vec(),
                        ),
                    )
                    .await?;
                    self.state = SenderState::WaitForCloseAck;
                }

                (SenderState::WaitForCloseAck, MessageType::ReceiverClosingAck) => {
                    debug!("receiver acknowledged close, transfer finished");
                    return Ok(());
                }

                (_, MessageType::TransferError) => {
                    warn!(
                        "shutting down due to a transfer error from the peer: {}",
                        message.payload_utf8()
                    );
                    return Err(Error::Peer(message.payload_utf8()));
                }

                (actual, received) => {
                    return self.unsynchronized(writer, crypt, received, actual).await;
                }
            }
        }
    }

    /// Two-stage wrong-state teardown: tell the peer which state we expected
    /// the message in, then surface the typed error.
    async fn unsynchronized<W>(
        &mut self,
        writer: &mut W,
        crypt: &Crypt,
        received: MessageType,
        actual: SenderState,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        match expected_state(received) {
            Some(expected) => {
                let reason = format!(
                    "transfer unsynchronized, expected state: {}, actual: {}",
                    expected.name(),
                    actual.name()
                );
                let _ = send_message(writer, crypt, &TransferMessage::error(&reason)).await;
                Err(Error::WrongState {
                    expected: expected.name(),
                    actual: actual.name(),
                })
            }
            None => {
                let reason = format!("unexpected message type {:?}", received);
                let _ = send_message(writer, crypt, &TransferMessage::error(&reason)).await;
                Err(Error::Protocol(reason))
            }
        }
    }

    /// Stream the payload as encrypted binary frames, reporting progress
    /// after each chunk. The last partial chunk is still sent; no chunk is
    /// reordered or repeated.
    async fn stream_payload<W>(&mut self, writer: &mut W, crypt: &Crypt) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let total = self.metadata.payload_size;
        let chunk = chunk_size(total) as usize;
        let mut buffer = vec![0u8; chunk];
        let mut bytes_sent: u64 = 0;
        debug!("streaming {} bytes in chunks of {}", total, chunk);

        loop {
            let read = self.payload.read(&mut buffer).map_err(Error::Transport)?;
            if read == 0 {
                break;
            }
            bytes_sent += read as u64;

            send_chunk(writer, crypt, &buffer[..read]).await?;
            let _ = self
                .progress
                .send(Progress {
                    bytes: bytes_sent,
                    total,
                })
                .await;
        }

        debug!("payload streamed, {} bytes sent", bytes_sent);
        Ok(())
    }
}
