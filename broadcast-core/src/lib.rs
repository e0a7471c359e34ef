//! Shared leaf types for the UDP broadcast overlay: the encrypted wire
//! message format, the shared-key type, and the error taxonomy both the
//! client and server crate build on.
//!
//! This crate has no networking of its own — it is the "wire message"
//! component from the design: an immutable value passed by copy, plus the
//! cryptographic envelope around it.

pub mod error;
pub mod group;
pub mod key;
pub mod observer;
pub mod tick;
pub mod wire;

pub use error::{ConfigError, WireError};
pub use group::BroadcastGroup;
pub use key::SharedKey;
pub use observer::{NoopObserver, Observer};
pub use tick::Tick;
pub use wire::{MessageType, WireMessage, MAX_DATAGRAM_LEN, MAX_PAYLOAD_LEN, RECV_BUFFER_LEN};
