//! The encrypted wire envelope.
//!
//! Plaintext layout (little-endian, sizes in bytes), matching the external
//! interface definition exactly:
//!
//! ```text
//! offset  size  field
//!   0      4    magic = 0x7BB1AA21
//!   4      8    timestampUtc (64-bit tick count)
//!  12      4    sourceAddress (raw IPv4 octets)
//!  16      1    messageType
//!  17      1    broadcastGroup
//!  18      2    payloadLength (N)
//!  20      N    payload
//!  20+N    4    salt
//! ```
//!
//! The full plaintext buffer above is encrypted as a single AES-256-GCM
//! block under the shared key; a fresh random 96-bit nonce is generated per
//! message and prepended to the ciphertext, so the bytes that actually hit
//! the wire are `nonce || ciphertext` (the ciphertext already carries its
//! own authentication tag, appended by the AEAD construction).

use std::convert::TryFrom;
use std::net::Ipv4Addr;

use aes_gcm::aead::{Aead, AeadCore, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::Rng;

use crate::error::WireError;
use crate::group::BroadcastGroup;
use crate::key::SharedKey;
use crate::tick::Tick;

pub const MAGIC: u32 = 0x7BB1_AA21;
pub const MAX_PAYLOAD_LEN: usize = 65535;

const HEADER_LEN: usize = 4 + 8 + 4 + 1 + 1 + 2; // 20
const TRAILER_LEN: usize = 4; // salt
const MAX_ENVELOPE_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN + TRAILER_LEN;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Largest possible on-wire datagram a compliant sender can produce.
pub const MAX_DATAGRAM_LEN: usize = NONCE_LEN + MAX_ENVELOPE_LEN + TAG_LEN;

/// Buffer size recv_from callers should allocate: large enough to hold the
/// largest possible valid datagram, comfortably exceeding any real network
/// MTU so no valid datagram is ever truncated.
pub const RECV_BUFFER_LEN: usize = MAX_DATAGRAM_LEN;

/// The five wire message types. Any stable disjoint assignment is
/// acceptable provided all peers agree; these codes match the definitive
/// external interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ClientRegister = 1,
    ClientUnregister = 2,
    Broadcast = 3,
    ServerRegister = 4,
    ServerUnregister = 5,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::ClientRegister),
            2 => Ok(MessageType::ClientUnregister),
            3 => Ok(MessageType::Broadcast),
            4 => Ok(MessageType::ServerRegister),
            5 => Ok(MessageType::ServerUnregister),
            _ => Err(WireError::InvalidMessage),
        }
    }
}

/// A decoded (or about-to-be-encoded) wire message. Immutable value,
/// passed by copy/clone — this type owns no socket or table state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub message_type: MessageType,
    pub timestamp: Tick,
    pub source_address: Ipv4Addr,
    pub broadcast_group: BroadcastGroup,
    pub payload: Vec<u8>,
}

impl WireMessage {
    /// Constructs a message, refusing payloads that would not fit the
    /// wire format's 16-bit length field.
    pub fn new(
        message_type: MessageType,
        timestamp: Tick,
        source_address: Ipv4Addr,
        broadcast_group: BroadcastGroup,
        payload: Vec<u8>,
    ) -> Result<Self, WireError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(WireError::PayloadTooLarge(payload.len()));
        }
        Ok(WireMessage {
            message_type,
            timestamp,
            source_address,
            broadcast_group,
            payload,
        })
    }

    /// Convenience for administrative messages (`ClientRegister`,
    /// `ClientUnregister`, `ServerRegister`, `ServerUnregister`), which
    /// carry a zero source address, group 0, and an empty payload.
    pub fn administrative(message_type: MessageType, timestamp: Tick) -> Self {
        WireMessage {
            message_type,
            timestamp,
            source_address: Ipv4Addr::UNSPECIFIED,
            broadcast_group: BroadcastGroup::new(0),
            payload: Vec::new(),
        }
    }

    /// Encrypts this message into the bytes that should be sent as the UDP
    /// payload: `nonce || ciphertext`.
    pub fn encode(&self, key: &SharedKey) -> Result<Vec<u8>, WireError> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(WireError::PayloadTooLarge(self.payload.len()));
        }

        let mut plaintext = Vec::with_capacity(HEADER_LEN + self.payload.len() + TRAILER_LEN);
        plaintext.extend_from_slice(&MAGIC.to_le_bytes());
        plaintext.extend_from_slice(&self.timestamp.as_micros().to_le_bytes());
        plaintext.extend_from_slice(&self.source_address.octets());
        plaintext.push(self.message_type as u8);
        plaintext.push(self.broadcast_group.get());
        plaintext.extend_from_slice(&(self.payload.len() as u16).to_le_bytes());
        plaintext.extend_from_slice(&self.payload);
        let salt: u32 = rand::thread_rng().gen();
        plaintext.extend_from_slice(&salt.to_le_bytes());

        let cipher = key.cipher();
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|_| WireError::InvalidMessage)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts and parses a received datagram. Does not check freshness —
    /// callers that know the accepted `MessageTTL` should follow up with
    /// [`check_freshness`].
    pub fn decode(bytes: &[u8], key: &SharedKey) -> Result<Self, WireError> {
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(WireError::InvalidMessage);
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = key.cipher();
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| WireError::InvalidMessage)?;

        if plaintext.len() < HEADER_LEN + TRAILER_LEN {
            return Err(WireError::InvalidMessage);
        }

        let magic = u32::from_le_bytes(plaintext[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(WireError::InvalidMessage);
        }

        let timestamp = Tick::from_micros(u64::from_le_bytes(plaintext[4..12].try_into().unwrap()));
        let source_address = Ipv4Addr::new(plaintext[12], plaintext[13], plaintext[14], plaintext[15]);
        let message_type = MessageType::try_from(plaintext[16])?;
        let broadcast_group = BroadcastGroup::new(plaintext[17]);
        let payload_len = u16::from_le_bytes(plaintext[18..20].try_into().unwrap()) as usize;

        if plaintext.len() != HEADER_LEN + payload_len + TRAILER_LEN {
            return Err(WireError::InvalidMessage);
        }
        let payload = plaintext[HEADER_LEN..HEADER_LEN + payload_len].to_vec();

        Ok(WireMessage {
            message_type,
            timestamp,
            source_address,
            broadcast_group,
            payload,
        })
    }
}

/// Freshness check: rejects a message whose timestamp is more than `ttl`
/// away from `now` in either direction.
pub fn check_freshness(timestamp: Tick, now: Tick, ttl: std::time::Duration) -> Result<(), WireError> {
    if now.abs_diff(timestamp) > ttl {
        return Err(WireError::StaleMessage {
            local_clock: now,
            remote_clock: timestamp,
            ttl,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SharedKey {
        SharedKey::from_bytes([7u8; 32])
    }

    #[test]
    fn roundtrip_preserves_all_fields() {
        let k = key();
        let msg = WireMessage::new(
            MessageType::Broadcast,
            Tick::from_micros(123_456_789),
            Ipv4Addr::new(10, 0, 0, 5),
            BroadcastGroup::new(42),
            vec![0x01, 0x02, 0x03],
        )
        .unwrap();
        let wire = msg.encode(&k).unwrap();
        let decoded = WireMessage::decode(&wire, &k).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn zero_length_payload_roundtrips() {
        let k = key();
        let msg = WireMessage::new(
            MessageType::ClientRegister,
            Tick::now(),
            Ipv4Addr::UNSPECIFIED,
            BroadcastGroup::new(0),
            Vec::new(),
        )
        .unwrap();
        let wire = msg.encode(&k).unwrap();
        let decoded = WireMessage::decode(&wire, &k).unwrap();
        assert_eq!(decoded.payload.len(), 0);
    }

    #[test]
    fn max_payload_roundtrips() {
        let k = key();
        let payload = vec![0xAB; MAX_PAYLOAD_LEN];
        let msg = WireMessage::new(
            MessageType::Broadcast,
            Tick::now(),
            Ipv4Addr::new(1, 2, 3, 4),
            BroadcastGroup::new(1),
            payload.clone(),
        )
        .unwrap();
        let wire = msg.encode(&k).unwrap();
        let decoded = WireMessage::decode(&wire, &k).unwrap();
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn oversized_payload_refuses_construction() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        let err = WireMessage::new(
            MessageType::Broadcast,
            Tick::now(),
            Ipv4Addr::UNSPECIFIED,
            BroadcastGroup::new(0),
            payload,
        )
        .unwrap_err();
        assert_eq!(err, WireError::PayloadTooLarge(MAX_PAYLOAD_LEN + 1));
    }

    #[test]
    fn wrong_key_fails_to_decode() {
        let msg = WireMessage::new(
            MessageType::Broadcast,
            Tick::now(),
            Ipv4Addr::new(1, 1, 1, 1),
            BroadcastGroup::new(3),
            vec![9, 9, 9],
        )
        .unwrap();
        let wire = msg.encode(&key()).unwrap();
        let other_key = SharedKey::from_bytes([9u8; 32]);
        let err = WireMessage::decode(&wire, &other_key).unwrap_err();
        assert_eq!(err, WireError::InvalidMessage);
    }

    #[test]
    fn flipped_bit_fails_to_decode() {
        let msg = WireMessage::new(
            MessageType::Broadcast,
            Tick::now(),
            Ipv4Addr::new(1, 1, 1, 1),
            BroadcastGroup::new(3),
            vec![9, 9, 9],
        )
        .unwrap();
        let mut wire = msg.encode(&key()).unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;
        let err = WireMessage::decode(&wire, &key()).unwrap_err();
        assert_eq!(err, WireError::InvalidMessage);
    }

    #[test]
    fn freshness_accepts_boundary_and_rejects_beyond() {
        let ttl = std::time::Duration::from_secs(900);
        let now = Tick::from_micros(10_000_000_000);
        let at_boundary = Tick::from_micros(now.as_micros() - ttl.as_micros() as u64);
        assert!(check_freshness(at_boundary, now, ttl).is_ok());

        let one_tick_beyond = Tick::from_micros(at_boundary.as_micros() - 1);
        assert!(check_freshness(one_tick_beyond, now, ttl).is_err());
    }

    #[test]
    fn group_boundaries_round_trip() {
        let k = key();
        for g in [0u8, 255u8] {
            let msg = WireMessage::new(
                MessageType::Broadcast,
                Tick::now(),
                Ipv4Addr::UNSPECIFIED,
                BroadcastGroup::new(g),
                Vec::new(),
            )
            .unwrap();
            let wire = msg.encode(&k).unwrap();
            let decoded = WireMessage::decode(&wire, &k).unwrap();
            assert_eq!(decoded.broadcast_group.get(), g);
        }
    }
}
