//! Typed transfer messages and their wire encoding.
//!
//! Control frame plaintext:
//! ```text
//! +-----------+------------------+-------------------+
//! | TYPE (1B) | LEN (4B BE)      | PAYLOAD (LEN B)   |
//! +-----------+------------------+-------------------+
//! ```
//!
//! On the transport every frame body starts with a framing tag so the
//! receiver can dispatch binary payload chunks without parsing them as
//! control messages.

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Framing tag for an encrypted control message.
pub const FRAME_CONTROL: u8 = 0x01;

/// Framing tag for an encrypted binary payload chunk.
pub const FRAME_PAYLOAD: u8 = 0x02;

const MESSAGE_HEADER_SIZE: usize = 5;

/// Control message discriminator. Codes follow declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    ReceiverHandshake = 0,
    SenderHandshake = 1,
    ReceiverRequestPayload = 2,
    SenderPayloadSent = 3,
    ReceiverPayloadAck = 4,
    SenderClosing = 5,
    ReceiverClosingAck = 6,
    TransferError = 7,
}

impl MessageType {
    /// Parse a type code. Unknown codes are a decode error, no fallback.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::ReceiverHandshake),
            1 => Ok(Self::SenderHandshake),
            2 => Ok(Self::ReceiverRequestPayload),
            3 => Ok(Self::SenderPayloadSent),
            4 => Ok(Self::ReceiverPayloadAck),
            5 => Ok(Self::SenderClosing),
            6 => Ok(Self::ReceiverClosingAck),
            7 => Ok(Self::TransferError),
            other => Err(Error::Decode(format!(
                "unknown message type {:#04x}",
                other
            ))),
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// One typed control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMessage {
    pub msg_type: MessageType,
    pub payload: Vec<u8>,
}

impl TransferMessage {
    pub fn new(msg_type: MessageType, payload: Vec<u8>) -> Self {
        Self { msg_type, payload }
    }

    pub fn empty(msg_type: MessageType) -> Self {
        Self::new(msg_type, Vec::new())
    }

    pub fn error(reason: &str) -> Self {
        Self::new(MessageType::TransferError, reason.as_bytes().to_vec())
    }

    /// Serialize to the plaintext control format.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MESSAGE_HEADER_SIZE + self.payload.len());
        out.push(self.msg_type.to_byte());
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a decrypted control frame.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MESSAGE_HEADER_SIZE {
            return Err(Error::Decode(format!(
                "control frame of {} bytes is shorter than the header",
                bytes.len()
            )));
        }

        let msg_type = MessageType::from_byte(bytes[0])?;
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&bytes[1..MESSAGE_HEADER_SIZE]);
        let payload_len = u32::from_be_bytes(len_bytes) as usize;

        if bytes.len() != MESSAGE_HEADER_SIZE + payload_len {
            return Err(Error::Decode(format!(
                "control frame length mismatch: header says {}, body has {}",
                payload_len,
                bytes.len() - MESSAGE_HEADER_SIZE
            )));
        }

        Ok(Self {
            msg_type,
            payload: bytes[MESSAGE_HEADER_SIZE..].to_vec(),
        })
    }

    pub fn payload_utf8(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Payload description carried inside `SenderHandshake`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TransferMetadata {
    pub filename: String,
    pub payload_size: u64,
    pub is_folder: bool,
}

/// Peer role at the relay.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

/// First line a peer sends to the relay on a fresh connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub slot_id: u16,
    pub role: Role,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JoinStatus {
    Waiting,
    Paired,
    Error,
}

/// Relay's JSON-line answer to a join (and the later pairing notification).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JoinResponse {
    pub status: JoinStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

impl JoinResponse {
    pub fn waiting() -> Self {
        Self {
            status: JoinStatus::Waiting,
            reason: None,
        }
    }

    pub fn paired() -> Self {
        Self {
            status: JoinStatus::Paired,
            reason: None,
        }
    }

    pub fn error(reason: &str) -> Self {
        Self {
            status: JoinStatus::Error,
            reason: Some(reason.to_string()),
        }
    }
}

/// Machine-readable error reasons used on the join line.
pub const REASON_SLOT_BUSY: &str = "slot busy";
pub const REASON_PAIR_TIMEOUT: &str = "pair timeout";
