//! Embedded in each participating application: registers presence with
//! every configured server, periodically renews, forwards outbound
//! broadcasts to the server cluster, and delivers inbound broadcasts to
//! the application.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use broadcast_core::{BroadcastGroup, MessageType, Observer, Tick, WireMessage};
use thiserror::Error;
use std::sync::Mutex as StdMutex;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::server_list::ServerList;
use crate::settings::ClientSettings;
use crate::transport::{Transport, UdpTransport};

/// A `Broadcast` message delivered to the embedding application: the
/// sender's claimed address and the opaque payload.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub source_address: Ipv4Addr,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is closed")]
    Closed,
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

struct Guarded {
    state: ClientState,
    servers: ServerList,
}

struct ClientInner {
    settings: ClientSettings,
    observer: Arc<dyn Observer>,
    transport: Arc<dyn Transport>,
    source_address: Ipv4Addr,
    guarded: Mutex<Guarded>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

/// Registers presence with every configured server, periodically renews,
/// forwards outbound broadcasts, and delivers inbound ones.
///
/// `Close`/`Dispose` is not implemented via `Drop`: sending the final
/// `ClientUnregister` is inherently asynchronous, and `Drop` cannot await.
/// Callers must call [`BroadcastClient::close`] explicitly.
pub struct BroadcastClient {
    inner: Arc<ClientInner>,
}

impl BroadcastClient {
    pub async fn start(
        settings: ClientSettings,
    ) -> std::io::Result<(Arc<BroadcastClient>, mpsc::Receiver<Inbound>)> {
        Self::start_with_observer(settings, Arc::new(broadcast_core::NoopObserver)).await
    }

    pub async fn start_with_observer(
        settings: ClientSettings,
        observer: Arc<dyn Observer>,
    ) -> std::io::Result<(Arc<BroadcastClient>, mpsc::Receiver<Inbound>)> {
        let transport = UdpTransport::bind(settings.bind, settings.socket_buffer_size).await?;
        let client = Self::start_with_transport(settings, observer, Arc::new(transport)).await?;
        let (tx, rx) = mpsc::channel(256);
        client.spawn_loops(tx);
        tokio::time::sleep(client.inner.settings.boot_delay).await;
        Ok((client, rx))
    }

    /// Test seam: start against an arbitrary [`Transport`] without binding
    /// a real socket, sleeping the boot delay, or spawning the receive and
    /// keep-alive/resolve loops. Useful for exercising `broadcast`/`close`
    /// state-gating logic in isolation; integration tests that need the
    /// full receive/fan-out path should use [`BroadcastClient::start`]
    /// against real loopback sockets instead.
    pub async fn start_with_transport(
        settings: ClientSettings,
        observer: Arc<dyn Observer>,
        transport: Arc<dyn Transport>,
    ) -> std::io::Result<Arc<BroadcastClient>> {
        let source_address = resolve_source_address(settings.bind);
        let initial_servers = ServerList::resolve(&settings.servers, &ServerList::empty()).await;

        let inner = Arc::new(ClientInner {
            settings,
            observer,
            transport,
            source_address,
            guarded: Mutex::new(Guarded {
                state: ClientState::Active,
                servers: initial_servers,
            }),
            tasks: StdMutex::new(Vec::new()),
        });

        Ok(Arc::new(BroadcastClient { inner }))
    }

    fn spawn_loops(self: &Arc<Self>, tx: mpsc::Sender<Inbound>) {
        let recv_handle = tokio::spawn(recv_loop(Arc::clone(&self.inner), tx));
        let tick_handle = tokio::spawn(tick_loop(Arc::clone(&self.inner)));
        let mut tasks = self.inner.tasks.lock().unwrap();
        tasks.push(recv_handle);
        tasks.push(tick_handle);
    }

    /// Sends one copy of `payload` as a `Broadcast` message to every
    /// server currently in the resolved server list. Best-effort: an
    /// individual transmit failure is logged and does not surface here.
    pub async fn broadcast(&self, payload: Vec<u8>) -> Result<(), ClientError> {
        let guard = self.inner.guarded.lock().await;
        if guard.state != ClientState::Active {
            return Err(ClientError::Closed);
        }
        let targets = guard.servers.targets();
        drop(guard);

        let payload_len = payload.len();
        let msg = WireMessage::new(
            MessageType::Broadcast,
            Tick::now(),
            self.inner.source_address,
            self.inner.settings.broadcast_group,
            payload,
        )
        .map_err(|_| ClientError::PayloadTooLarge(payload_len))?;

        self.inner.send_to_all(&msg, &targets).await;
        Ok(())
    }

    /// Idempotent: best-effort `ClientUnregister` to every known server,
    /// then transitions to `Closed`.
    pub async fn close(&self) {
        let targets = {
            let mut guard = self.inner.guarded.lock().await;
            if guard.state != ClientState::Active {
                return;
            }
            guard.state = ClientState::Closing;
            guard.servers.targets()
        };

        let unregister = WireMessage::administrative(MessageType::ClientUnregister, Tick::now());
        self.inner.send_to_all(&unregister, &targets).await;

        {
            let mut guard = self.inner.guarded.lock().await;
            guard.state = ClientState::Closed;
        }

        let mut tasks = self.inner.tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    pub fn broadcast_group(&self) -> BroadcastGroup {
        self.inner.settings.broadcast_group
    }

    /// Fault-injection hook for tests: stops background tasks immediately
    /// without sending `ClientUnregister`, simulating a crashed client
    /// (spec scenario 3: "stop the client without sending
    /// `ClientUnregister` (simulated fault)").
    pub async fn kill_without_unregister(&self) {
        {
            let mut guard = self.inner.guarded.lock().await;
            guard.state = ClientState::Closed;
        }
        let mut tasks = self.inner.tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl ClientInner {
    async fn send_to_all(&self, msg: &WireMessage, targets: &[SocketAddr]) {
        let bytes = match msg.encode(&self.settings.shared_key) {
            Ok(b) => b,
            Err(err) => {
                warn!(?err, "failed to encode outbound message");
                return;
            }
        };
        for target in targets {
            if let Err(err) = self.transport.send_to(&bytes, *target).await {
                warn!(%target, %err, "transient socket error sending datagram");
            }
        }
    }
}

async fn recv_loop(inner: Arc<ClientInner>, tx: mpsc::Sender<Inbound>) {
    let mut buf = vec![0u8; broadcast_core::RECV_BUFFER_LEN];
    loop {
        {
            let guard = inner.guarded.lock().await;
            if guard.state == ClientState::Closed {
                return;
            }
        }

        let (len, from) = match inner.transport.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(err) => {
                warn!(%err, "transient socket error receiving datagram");
                continue;
            }
        };

        let decoded = match WireMessage::decode(&buf[..len], &inner.settings.shared_key) {
            Ok(m) => m,
            Err(_) => {
                inner.observer.on_invalid_message(from);
                warn!(%from, "dropping invalid message");
                continue;
            }
        };

        let now = Tick::now();
        if broadcast_core::wire::check_freshness(decoded.timestamp, now, inner.settings.message_ttl).is_err()
        {
            inner
                .observer
                .on_stale_message(from, now, decoded.timestamp);
            warn!(
                %from,
                local_clock = now.as_micros(),
                remote_clock = decoded.timestamp.as_micros(),
                "dropping stale message"
            );
            continue;
        }

        if decoded.message_type != MessageType::Broadcast {
            continue;
        }
        if decoded.broadcast_group != inner.settings.broadcast_group {
            continue;
        }

        let inbound = Inbound {
            source_address: decoded.source_address,
            payload: decoded.payload,
        };
        if tx.send(inbound).await.is_err() {
            // Receiver dropped; keep draining the socket so the loop
            // doesn't back up, but there is no one left to deliver to.
        }
    }
}

async fn tick_loop(inner: Arc<ClientInner>) {
    let mut interval = tokio::time::interval(inner.settings.bk_task_interval);
    let mut next_keep_alive = Instant::now();
    let mut next_resolve = Instant::now();

    loop {
        interval.tick().await;

        {
            let guard = inner.guarded.lock().await;
            if guard.state != ClientState::Active {
                return;
            }
        }

        let now = Instant::now();

        if now >= next_keep_alive {
            let targets = {
                let guard = inner.guarded.lock().await;
                guard.servers.targets()
            };
            let register = WireMessage::administrative(MessageType::ClientRegister, Tick::now());
            inner.send_to_all(&register, &targets).await;
            next_keep_alive = now + inner.settings.keep_alive_interval;
        }

        if now >= next_resolve {
            let previous = {
                let guard = inner.guarded.lock().await;
                guard.servers.clone()
            };
            let resolved = ServerList::resolve(&inner.settings.servers, &previous).await;
            {
                let mut guard = inner.guarded.lock().await;
                guard.servers = resolved;
            }
            info!("server list re-resolved");
            next_resolve = now + inner.settings.server_resolve_interval;
        }
    }
}

fn resolve_source_address(bind: SocketAddr) -> Ipv4Addr {
    if !bind.ip().is_unspecified() {
        if let SocketAddr::V4(v4) = bind {
            return *v4.ip();
        }
    }
    match local_ip_address::local_ip() {
        Ok(std::net::IpAddr::V4(addr)) => addr,
        _ => Ipv4Addr::UNSPECIFIED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ClientSettings;
    use crate::transport::NullTransport;
    use broadcast_core::SharedKey;

    fn settings() -> ClientSettings {
        let mut s = ClientSettings::new(
            vec!["127.0.0.1:7530".to_string()],
            SharedKey::from_bytes([3u8; 32]),
        );
        s.boot_delay = std::time::Duration::ZERO;
        s
    }

    #[tokio::test]
    async fn broadcast_after_close_is_rejected() {
        let transport = Arc::new(NullTransport::new("127.0.0.1:9000".parse().unwrap()));
        let client =
            BroadcastClient::start_with_transport(settings(), Arc::new(broadcast_core::NoopObserver), transport)
                .await
                .unwrap();
        client.close().await;
        let err = client.broadcast(vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, ClientError::Closed));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let transport = Arc::new(NullTransport::new("127.0.0.1:9001".parse().unwrap()));
        let client =
            BroadcastClient::start_with_transport(settings(), Arc::new(broadcast_core::NoopObserver), transport)
                .await
                .unwrap();
        client.close().await;
        client.close().await;
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected_without_sending() {
        let transport = Arc::new(NullTransport::new("127.0.0.1:9002".parse().unwrap()));
        let client =
            BroadcastClient::start_with_transport(settings(), Arc::new(broadcast_core::NoopObserver), transport)
                .await
                .unwrap();
        let oversized = vec![0u8; broadcast_core::MAX_PAYLOAD_LEN + 1];
        let err = client.broadcast(oversized).await.unwrap_err();
        assert!(matches!(err, ClientError::PayloadTooLarge(_)));
    }
}
