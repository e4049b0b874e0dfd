use std::time::Duration;

use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::cryptography::{
    create_session_identity, derive_session_key, start_pake, Crypt, SessionKey,
};
use crate::errors::{Error, Result};
use crate::password::TransferPassword;
use crate::protocol::{
    JoinRequest, JoinResponse, JoinStatus, Role, TransferMessage, FRAME_CONTROL, FRAME_PAYLOAD,
    REASON_PAIR_TIMEOUT, REASON_SLOT_BUSY,
};
use crate::{HANDSHAKE_TIMEOUT, IDLE_TIMEOUT, MAX_FRAME_BYTES, PAIR_TIMEOUT};

/// Extra slack on the client side so the relay's own pairing deadline fires
/// first and arrives as a proper error line.
const PAIR_GRACE: Duration = Duration::from_secs(5);

/// Write one transport frame: `[len: u32 BE][body]`.
pub async fn write_raw_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_BYTES {
        return Err(Error::Protocol(format!(
            "outbound frame of {} bytes exceeds the frame limit",
            body.len()
        )));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one transport frame. A clean EOF on the length prefix maps to
/// [`Error::TransportClosed`].
pub async fn read_raw_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::TransportClosed)
        }
        Err(e) => return Err(e.into()),
    };

    if len > MAX_FRAME_BYTES {
        return Err(Error::Decode(format!(
            "inbound frame of {} bytes exceeds the frame limit",
            len
        )));
    }

    let mut body = vec![0u8; len];
    match reader.read_exact(&mut body).await {
        Ok(_) => Ok(body),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::TransportClosed),
        Err(e) => Err(e.into()),
    }
}

/// Perform the PAKE blob exchange and derive the session key.
///
/// Each side sends its single SPAKE2 blob as a raw length-prefixed frame,
/// then reads the peer's. The exchange is bounded by `HANDSHAKE_TIMEOUT`.
pub async fn perform_pake<R, W>(
    reader: &mut R,
    writer: &mut W,
    password: &TransferPassword,
) -> Result<SessionKey>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let identity = create_session_identity(password.slot());
    let (spake, outbound) = start_pake(password, &identity);

    write_raw_frame(writer, &outbound).await?;

    let inbound = match timeout(HANDSHAKE_TIMEOUT, read_raw_frame(reader)).await {
        Ok(result) => result?,
        Err(_) => return Err(Error::HandshakeTimeout),
    };
    debug!("PAKE blob exchange complete, deriving session key");

    derive_session_key(spake, &inbound)
}

/// An inbound post-handshake frame, dispatched on the framing tag.
#[derive(Debug)]
pub enum InboundFrame {
    Message(TransferMessage),
    Chunk(Vec<u8>),
}

/// Encrypt and send one control message as a tagged frame.
pub async fn send_message<W>(writer: &mut W, crypt: &Crypt, message: &TransferMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let sealed = crypt.encrypt(&message.encode())?;
    let mut body = Vec::with_capacity(1 + sealed.len());
    body.push(FRAME_CONTROL);
    body.extend_from_slice(&sealed);
    write_raw_frame(writer, &body).await
}

/// Encrypt and send one binary payload chunk as a tagged frame.
pub async fn send_chunk<W>(writer: &mut W, crypt: &Crypt, chunk: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let sealed = crypt.encrypt(chunk)?;
    let mut body = Vec::with_capacity(1 + sealed.len());
    body.push(FRAME_PAYLOAD);
    body.extend_from_slice(&sealed);
    write_raw_frame(writer, &body).await
}

/// Receive and decrypt the next frame, bounded by the idle deadline.
pub async fn recv_frame<R>(reader: &mut R, crypt: &Crypt) -> Result<InboundFrame>
where
    R: AsyncRead + Unpin,
{
    let body = match timeout(IDLE_TIMEOUT, read_raw_frame(reader)).await {
        Ok(result) => result?,
        Err(_) => return Err(Error::IdleTimeout(IDLE_TIMEOUT)),
    };

    let (tag, sealed) = body
        .split_first()
        .ok_or_else(|| Error::Decode("empty frame body".into()))?;
    let plaintext = crypt.decrypt(sealed)?;

    match *tag {
        FRAME_CONTROL => Ok(InboundFrame::Message(TransferMessage::decode(&plaintext)?)),
        FRAME_PAYLOAD => Ok(InboundFrame::Chunk(plaintext)),
        other => Err(Error::Decode(format!("unknown frame tag {:#04x}", other))),
    }
}

/// Duplex halves of a paired relay connection. All later reads must go
/// through the buffered half so no bytes are lost to the join phase.
pub type RelayConnection = (BufReader<OwnedReadHalf>, OwnedWriteHalf);

/// Connect to the relay, join the slot and wait until a peer is paired.
///
/// Sends the JSON join line and consumes status lines (`waiting`, then
/// `paired`) before handing the connection over to the framed protocol.
pub async fn connect_to_relay(relay_addr: &str, slot: u16, role: Role) -> Result<RelayConnection> {
    let stream = TcpStream::connect(relay_addr)
        .await
        .map_err(|_| Error::RelayUnreachable(relay_addr.to_string()))?;
    debug!("connected to relay at {}", relay_addr);

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let join = serde_json::to_string(&JoinRequest { slot_id: slot, role })
        .map_err(|e| Error::Protocol(format!("could not encode join request: {}", e)))?;
    write_half.write_all(join.as_bytes()).await?;
    write_half.write_all(b"\n").await?;
    write_half.flush().await?;

    let deadline = PAIR_TIMEOUT.saturating_add(PAIR_GRACE);
    loop {
        let mut line = String::new();
        let read = match timeout(deadline, reader.read_line(&mut line)).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::PairTimeout),
        };
        if read == 0 {
            return Err(Error::TransportClosed);
        }

        let response: JoinResponse = serde_json::from_str(line.trim())
            .map_err(|e| Error::Protocol(format!("bad relay response: {}", e)))?;

        match response.status {
            JoinStatus::Paired => {
                debug!("paired on slot {}", slot);
                return Ok((reader, write_half));
            }
            JoinStatus::Waiting => {
                debug!("waiting on slot {} for a peer", slot);
            }
            JoinStatus::Error => {
                let reason = response.reason.unwrap_or_default();
                return Err(match reason.as_str() {
                    REASON_SLOT_BUSY => Error::SlotBusy,
                    REASON_PAIR_TIMEOUT => Error::PairTimeout,
                    _ => Error::Protocol(format!("relay rejected join: {}", reason)),
                });
            }
        }
    }
}
