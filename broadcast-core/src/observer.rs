//! Injectable observability seam (spec section 9: "accept a small
//! observability interface at construction... default to a no-op
//! implementation"). `tracing` carries human-readable log lines; this
//! trait exists for an embedding application that wants counters without
//! this crate depending on a metrics-export format.

use std::net::SocketAddr;

use crate::group::BroadcastGroup;
use crate::tick::Tick;

/// Hooks a `BroadcastClient`/`BroadcastServer` calls on notable events.
/// Every method has a no-op default; implement only the ones you care
/// about.
pub trait Observer: Send + Sync {
    fn on_invalid_message(&self, _from: SocketAddr) {}

    fn on_stale_message(&self, _from: SocketAddr, _local_clock: Tick, _remote_clock: Tick) {}

    fn on_client_registered(&self, _endpoint: SocketAddr, _group: BroadcastGroup) {}

    fn on_client_evicted(&self, _endpoint: SocketAddr) {}

    fn on_server_registered(&self, _endpoint: SocketAddr) {}

    fn on_server_evicted(&self, _endpoint: SocketAddr) {}

    fn on_master_changed(&self, _is_master: bool) {}

    fn on_fanout(&self, _group: BroadcastGroup, _recipient_count: usize) {}

    /// Fired once per background-timer tick, after pruning, with the
    /// current table sizes and election state.
    fn on_tick(&self, _live_clients: usize, _live_peers: usize, _is_master: bool) {}
}

/// Default observer: does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}
