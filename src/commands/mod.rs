//! # Commands Module
//!
//! The three command handlers behind the `tran` CLI:
//!
//! ## `send`
//! Announces a payload and streams it to an authenticated receiver:
//! - Generates a single-use transfer password
//! - Joins the relay slot and waits for the receiver to pair
//! - Compresses folders into a zip archive
//! - Runs the sender engine over the paired connection
//!
//! ## `receive`
//! Fetches a payload with a password obtained out-of-band:
//! - Parses the password (or prompts for it)
//! - Joins the relay slot and pairs with the waiting sender
//! - Runs the receiver engine and writes the file or unpacks the folder
//!
//! ## `relay`
//! Runs the rendezvous server:
//! - Pairs senders and receivers by slot id
//! - Pipes opaque encrypted frames between paired peers

pub mod send;
pub mod receive;
pub mod relay;
