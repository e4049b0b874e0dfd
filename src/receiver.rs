//! Receiver transfer engine, the mirror of the sender's state machine.
//!
//! The receiver opens the encrypted conversation: after PAKE it sends
//! `ReceiverHandshake`, requests the payload once the sender's handshake
//! (with the advertised size) arrives, appends decrypted chunks to the
//! output channel and acknowledges the close.

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::cryptography::Crypt;
use crate::errors::{Error, Result};
use crate::networking::{perform_pake, recv_frame, send_message, InboundFrame};
use crate::password::TransferPassword;
use crate::protocol::{MessageType, TransferMessage, TransferMetadata};
use crate::session::{CloseSignal, Progress};

/// Receiver protocol states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Initial,
    WaitForHandshake,
    ReceivingPayload,
    WaitForCloseMessage,
    Terminated,
}

impl ReceiverState {
    pub fn name(self) -> &'static str {
        match self {
            ReceiverState::Initial => "Initial",
            ReceiverState::WaitForHandshake => "WaitForHandshake",
            ReceiverState::ReceivingPayload => "ReceivingPayload",
            ReceiverState::WaitForCloseMessage => "WaitForCloseMessage",
            ReceiverState::Terminated => "Terminated",
        }
    }
}

/// The state in which an inbound sender message would be legal.
fn expected_state(msg_type: MessageType) -> Option<ReceiverState> {
    match msg_type {
        MessageType::SenderHandshake => Some(ReceiverState::WaitForHandshake),
        MessageType::SenderPayloadSent => Some(ReceiverState::ReceivingPayload),
        MessageType::SenderClosing => Some(ReceiverState::WaitForCloseMessage),
        _ => None,
    }
}

/// Receiver transfer engine.
///
/// Decrypted payload chunks are handed to the `output` channel in arrival
/// order; the advertised metadata is delivered once through `metadata_tx` so
/// the consumer can decide where the bytes go before the stream starts.
pub struct Receiver {
    state: ReceiverState,
    password: TransferPassword,
    output: mpsc::Sender<Vec<u8>>,
    metadata_tx: Option<oneshot::Sender<TransferMetadata>>,
    progress: mpsc::Sender<Progress>,
    close: CloseSignal,
    payload_size: u64,
    bytes_received: u64,
}

impl Receiver {
    pub fn new(
        password: TransferPassword,
        output: mpsc::Sender<Vec<u8>>,
        metadata_tx: oneshot::Sender<TransferMetadata>,
        progress: mpsc::Sender<Progress>,
        close: CloseSignal,
    ) -> Self {
        Self {
            state: ReceiverState::Initial,
            password,
            output,
            metadata_tx: Some(metadata_tx),
            progress,
            close,
            payload_size: 0,
            bytes_received: 0,
        }
    }

    /// Run the full receiver protocol over an established transport.
    pub async fn run<R, W>(mut self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let session = perform_pake(&mut reader, &mut writer, &self.password).await?;
        let crypt = Crypt::new(&session);
        debug!("session key established, sending receiver handshake");

        let result = async {
            send_message(
                &mut writer,
                &crypt,
                &TransferMessage::empty(MessageType::ReceiverHandshake),
            )
            .await?;
            self.state = ReceiverState::WaitForHandshake;
            self.drive(&mut reader, &mut writer, &crypt).await
        }
        .await;

        self.state = ReceiverState::Terminated;
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
                InboundFrame::Chunk(bytes) => {
                    self.on_chunk(bytes, writer, crypt).await?;
                    continue;
                }
                InboundFrame::Message(message) => message,
            };

            match (self.state, message.msg_type) {
                (ReceiverState::WaitForHandshake, MessageType::SenderHandshake) => {
                    let metadata: TransferMetadata = bincode::deserialize(&message.payload)
                        .map_err(|e| Error::Decode(e.to_string()))?;
                    debug!(
                        "receiving {} ({} bytes)",
                        metadata.filename, metadata.payload_size
                    );

                    self.payload_size = metadata.payload_size;
                    if let Some(tx) = self.metadata_tx.take() {
                        let _ = tx.send(metadata);
                    }

                    send_message(
                        writer,
                        crypt,
                        &TransferMessage::empty(MessageType::ReceiverRequestPayload),
                    )
                    .await?;
                    self.state = ReceiverState::ReceivingPayload;
                }

                (ReceiverState::ReceivingPayload, MessageType::SenderPayloadSent) => {
                    if self.bytes_received != self.payload_size {
                        return self.size_mismatch(writer, crypt).await;
                    }
                    send_message(
                        writer,
                        crypt,
                        &TransferMessage::empty(MessageType::ReceiverPayloadAck),
                    )
                    .await?;
                    self.state = ReceiverState::WaitForCloseMessage;
                }

                (ReceiverState::WaitForCloseMessage, MessageType::SenderClosing) => {
                    send_message(
                        writer,
                        crypt,
                        &TransferMessage::empty(MessageType::ReceiverClosingAck),
                    )
                    .await?;
                    debug!("acknowledged sender close, transfer finished");
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

    async fn on_chunk<W>(&mut self, bytes: Vec<u8>, writer: &mut W, crypt: &Crypt) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if self.state != ReceiverState::ReceivingPayload {
            let reason = format!(
                "transfer unsynchronized, expected state: {}, actual: {}",
                ReceiverState::ReceivingPayload.name(),
                self.state.name()
            );
            let _ = send_message(writer, crypt, &TransferMessage::error(&reason)).await;
            return Err(Error::WrongState {
                expected: ReceiverState::ReceivingPayload.name(),
                actual: self.state.name(),
            });
        }

        self.bytes_received += bytes.len() as u64;
        if self.bytes_received > self.payload_size {
            return self.size_mismatch(writer, crypt).await;
        }

        if self.output.send(bytes).await.is_err() {
            // The consumer went away; tear down locally.
            return Err(Error::Cancelled);
        }
        let _ = self
            .progress
            .send(Progress {
                bytes: self.bytes_received,
                total: self.payload_size,
            })
            .await;
        Ok(())
    }

    async fn size_mismatch<W>(&mut self, writer: &mut W, crypt: &Crypt) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let reason = format!(
            "payload size mismatch: advertised {} bytes, received {}",
            self.payload_size, self.bytes_received
        );
        let _ = send_message(writer, crypt, &TransferMessage::error(&reason)).await;
        Err(Error::PayloadSizeMismatch {
            expected: self.payload_size,
            actual: self.bytes_received,
        })
    }

    async fn unsynchronized<W>(
        &mut self,
        writer: &mut W,
        crypt: &Crypt,
        received: MessageType,
        actual: ReceiverState,
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_state_maps_sender_messages() {
        assert_eq!(
            expected_state(MessageType::SenderHandshake),
            Some(ReceiverState::WaitForHandshake)
        );
        assert_eq!(
            expected_state(MessageType::SenderClosing),
            Some(ReceiverState::WaitForCloseMessage)
        );
        assert_eq!(expected_state(MessageType::ReceiverPayloadAck), None);
    }

    #[test]
    fn state_names_match_variants() {
        assert_eq!(ReceiverState::ReceivingPayload.name(), "ReceivingPayload");
        assert_eq!(ReceiverState::WaitForCloseMessage.name(), "WaitForCloseMessage");
    }
}
