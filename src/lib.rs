use std::time::Duration;

pub mod errors;
pub mod config;
pub mod password;
pub mod cryptography;
pub mod protocol;
pub mod session;
pub mod networking;
pub mod sender;
pub mod receiver;
pub mod relay_utils;
pub mod bytes;
pub mod commands;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const SALT_SIZE: usize = 16;
pub const TAG_SIZE: usize = 16;
pub const ENCRYPTION_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

pub const MAX_CHUNK_BYTES: u64 = 1 << 14;
pub const MAX_SEND_CHUNKS: u64 = 1024;

pub const MAX_FRAME_BYTES: usize = (1 << 27) + 64;
pub const MAX_INFLIGHT_FRAMES: usize = 64;

pub const PAIR_TIMEOUT: Duration = Duration::from_secs(600);
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_RELAY_ADDR: &str = "164.92.77.140:7021";
