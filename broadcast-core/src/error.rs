//! Error taxonomy for the wire message and configuration layers.
//!
//! `ClosedError` and `TransientSocketError` from the design's taxonomy live
//! in `broadcast-net` (they concern a running client/server, not the wire
//! format or config values this crate owns).

use std::time::Duration;

use thiserror::Error;

use crate::tick::Tick;

/// Failures that occur decoding or constructing a wire envelope.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Decryption failed (bad key, corrupted/tampered ciphertext, or wrong
    /// nonce length) or the decrypted frame's magic number didn't match.
    /// The two causes are collapsed into one variant: the spec does not
    /// distinguish them, and separating them would give an attacker an
    /// oracle for which check failed first.
    #[error("invalid message: decryption or magic check failed")]
    InvalidMessage,

    /// Timestamp fell outside the accepted freshness window.
    #[error(
        "stale message: |local {local_clock:?} - remote {remote_clock:?}| exceeds ttl {ttl:?}"
    )]
    StaleMessage {
        local_clock: Tick,
        remote_clock: Tick,
        ttl: Duration,
    },

    /// Payload exceeds the wire format's 16-bit length field.
    #[error("payload too large: {0} bytes exceeds max {max}", max = crate::wire::MAX_PAYLOAD_LEN)]
    PayloadTooLarge(usize),

    /// Broadcast group outside 0..=255.
    #[error("broadcast group out of range: {0}")]
    InvalidGroup(i64),
}

/// Failures at construction time: bad configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("server list is empty")]
    EmptyServerList,

    #[error("{0} must be positive")]
    NonPositiveTtl(&'static str),

    #[error("malformed endpoint spec: {0:?}")]
    MalformedEndpoint(String),

    #[error("self endpoint does not appear in the configured peer list")]
    SelfNotInPeerList,
}
