//! Cluster membership table and the master-election rule.
//!
//! Election has no explicit leader messages, quorum, or voting: every
//! server evaluates the same pure rule locally, so at most one server ever
//! deems itself master given an identical membership view.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

/// A peer server's soft-state row: lifetime bounded by `deadline`, renewed
/// on every `ServerRegister` received from that endpoint.
#[derive(Debug, Clone, Copy)]
pub struct PeerEntry {
    pub deadline: Instant,
}

/// The server whose endpoint string compares lexically least, among
/// `self_endpoint` and every endpoint in `live_peers`, is the master. Pure
/// function of the membership view: no clock, no I/O, no side effects.
pub fn is_master(self_endpoint: &SocketAddr, live_peers: &HashMap<SocketAddr, PeerEntry>) -> bool {
    let self_key = self_endpoint.to_string();
    !live_peers
        .keys()
        .any(|peer| peer != self_endpoint && peer.to_string() < self_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> PeerEntry {
        PeerEntry {
            deadline: Instant::now() + std::time::Duration::from_secs(60),
        }
    }

    #[test]
    fn lexically_smallest_endpoint_is_master() {
        let low: SocketAddr = "10.0.0.1:7530".parse().unwrap();
        let high: SocketAddr = "10.0.0.2:7530".parse().unwrap();

        let mut peers = HashMap::new();
        peers.insert(high, entry());
        assert!(is_master(&low, &peers));

        let mut peers = HashMap::new();
        peers.insert(low, entry());
        assert!(!is_master(&high, &peers));
    }

    #[test]
    fn alone_is_always_master() {
        let solo: SocketAddr = "10.0.0.5:7530".parse().unwrap();
        assert!(is_master(&solo, &HashMap::new()));
    }

    #[test]
    fn new_lexically_smaller_peer_preempts_incumbent() {
        let incumbent: SocketAddr = "10.0.0.5:7530".parse().unwrap();
        let mut peers = HashMap::new();
        assert!(is_master(&incumbent, &peers));

        let challenger: SocketAddr = "10.0.0.0:7530".parse().unwrap();
        peers.insert(challenger, entry());
        assert!(!is_master(&incumbent, &peers));
    }

    #[test]
    fn self_entry_in_table_does_not_disqualify_self() {
        let me: SocketAddr = "10.0.0.5:7530".parse().unwrap();
        let mut peers = HashMap::new();
        peers.insert(me, entry());
        assert!(is_master(&me, &peers));
    }
}
