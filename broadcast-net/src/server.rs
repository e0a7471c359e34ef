//! Cluster member: tracks live clients and peer servers, elects a single
//! master, and (only while master) fans out valid `Broadcast` messages to
//! every client registered in the matching group.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Instant;

use broadcast_core::{BroadcastGroup, MessageType, Observer, Tick, WireMessage};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cluster::{self, PeerEntry};
use crate::settings::ServerSettings;
use crate::transport::{Transport, UdpTransport};

/// A registered client's soft-state row.
#[derive(Debug, Clone, Copy)]
struct ClientEntry {
    broadcast_group: BroadcastGroup,
    deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    Active,
    Closing,
    Closed,
}

struct Guarded {
    state: ServerState,
    clients: HashMap<SocketAddr, ClientEntry>,
    peers: HashMap<SocketAddr, PeerEntry>,
}

struct ServerInner {
    settings: ServerSettings,
    observer: Arc<dyn Observer>,
    transport: Arc<dyn Transport>,
    self_endpoint: SocketAddr,
    guarded: Mutex<Guarded>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    /// Last reported election state, so [`ServerInner::report_master_state`]
    /// only notifies on a flip, not on every re-evaluation.
    last_master: AtomicBool,
}

/// Cluster member. `Close` is idempotent and, unlike the client, sleeps
/// [`ServerSettings::close_linger`] after announcing departure so in-flight
/// broadcasts have a chance to be picked up by the newly elected master.
pub struct BroadcastServer {
    inner: Arc<ServerInner>,
}

impl BroadcastServer {
    pub async fn start(settings: ServerSettings) -> Result<Arc<BroadcastServer>, ServerStartError> {
        Self::start_with_observer(settings, Arc::new(broadcast_core::NoopObserver)).await
    }

    pub async fn start_with_observer(
        settings: ServerSettings,
        observer: Arc<dyn Observer>,
    ) -> Result<Arc<BroadcastServer>, ServerStartError> {
        check_self_in_peer_list(&settings)?;
        let transport = UdpTransport::bind(settings.bind, settings.socket_buffer_size).await?;
        let server =
            Self::start_with_transport(settings, observer, Arc::new(transport)).await?;
        server.spawn_loops();
        Ok(server)
    }

    /// Test seam: start against an arbitrary [`Transport`] without binding
    /// a real socket or spawning the receive/background loops.
    pub async fn start_with_transport(
        settings: ServerSettings,
        observer: Arc<dyn Observer>,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<BroadcastServer>, ServerStartError> {
        check_self_in_peer_list(&settings)?;
        let self_endpoint = settings.self_match_endpoint();

        let inner = Arc::new(ServerInner {
            settings,
            observer,
            transport,
            self_endpoint,
            guarded: Mutex::new(Guarded {
                state: ServerState::Active,
                clients: HashMap::new(),
                peers: HashMap::new(),
            }),
            tasks: StdMutex::new(Vec::new()),
            last_master: AtomicBool::new(false),
        });

        Ok(Arc::new(BroadcastServer { inner }))
    }

    /// Spawns the receive loop and background (prune + self-register)
    /// loop. Split out from construction so tests can drive the dispatch
    /// table directly without a live background timer racing them.
    pub fn spawn_loops(self: &Arc<Self>) {
        let recv_handle = tokio::spawn(recv_loop(Arc::clone(&self.inner)));
        let tick_handle = tokio::spawn(tick_loop(Arc::clone(&self.inner)));
        let mut tasks = self.inner.tasks.lock().unwrap();
        tasks.push(recv_handle);
        tasks.push(tick_handle);
    }

    /// Whether this server currently considers itself master: the pure
    /// function of the live peer membership view (spec 4.4), evaluated
    /// against the table's present contents.
    pub async fn is_master(&self) -> bool {
        let guard = self.inner.guarded.lock().await;
        cluster::is_master(&self.inner.self_endpoint, &guard.peers)
    }

    pub fn self_endpoint(&self) -> SocketAddr {
        self.inner.self_endpoint
    }

    pub async fn live_client_count(&self) -> usize {
        self.inner.guarded.lock().await.clients.len()
    }

    pub async fn live_peer_count(&self) -> usize {
        self.inner.guarded.lock().await.peers.len()
    }

    /// `Closing`: announce departure to every peer, linger, close the
    /// socket, cancel timers, clear tables. Idempotent.
    pub async fn close(&self) {
        {
            let mut guard = self.inner.guarded.lock().await;
            if guard.state != ServerState::Active {
                return;
            }
            guard.state = ServerState::Closing;
        }

        // Configured peer list, not the dynamic `peers` table: a peer that
        // hasn't registered yet (or whose entry expired) still needs to hear
        // we left.
        let peer_targets = self.inner.settings.peers.clone();
        let unregister = WireMessage::administrative(MessageType::ServerUnregister, Tick::now());
        self.inner.send_to_all(&unregister, &peer_targets).await;

        tokio::time::sleep(self.inner.settings.close_linger).await;

        {
            let mut guard = self.inner.guarded.lock().await;
            guard.state = ServerState::Closed;
            guard.clients.clear();
            guard.peers.clear();
        }

        let mut tasks = self.inner.tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    /// Fault-injection hook for tests: stops background tasks immediately
    /// without announcing departure, simulating a crashed peer (spec
    /// scenario 4: "Kill it; wait > ServerTTL").
    pub async fn kill_without_unregister(&self) {
        {
            let mut guard = self.inner.guarded.lock().await;
            guard.state = ServerState::Closed;
        }
        let mut tasks = self.inner.tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

fn check_self_in_peer_list(settings: &ServerSettings) -> Result<(), ServerStartError> {
    settings.validate()?;
    let self_endpoint = settings.self_match_endpoint();
    if !settings.peers.contains(&self_endpoint) {
        return Err(ServerStartError::Config(broadcast_core::ConfigError::SelfNotInPeerList));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ServerStartError {
    #[error(transparent)]
    Config(#[from] broadcast_core::ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ServerInner {
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

    /// Notifies the observer and logs exactly when election state flips,
    /// not on every re-evaluation (every `Broadcast` receipt and every
    /// background tick recomputes `is_master`).
    fn report_master_state(&self, is_master: bool) {
        let previous = self.last_master.swap(is_master, Ordering::SeqCst);
        if previous != is_master {
            self.observer.on_master_changed(is_master);
            info!(is_master, "master election state changed");
        }
    }
}

async fn recv_loop(inner: Arc<ServerInner>) {
    let mut buf = vec![0u8; broadcast_core::RECV_BUFFER_LEN];
    loop {
        {
            let guard = inner.guarded.lock().await;
            if guard.state == ServerState::Closed {
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
            inner.observer.on_stale_message(from, now, decoded.timestamp);
            warn!(
                %from,
                local_clock = now.as_micros(),
                remote_clock = decoded.timestamp.as_micros(),
                "dropping stale message"
            );
            continue;
        }

        dispatch(&inner, from, decoded).await;
    }
}

async fn dispatch(inner: &Arc<ServerInner>, from: SocketAddr, msg: WireMessage) {
    match msg.message_type {
        MessageType::ServerRegister => {
            let deadline = Instant::now() + inner.settings.server_ttl;
            let mut guard = inner.guarded.lock().await;
            guard.peers.insert(from, PeerEntry { deadline });
            drop(guard);
            inner.observer.on_server_registered(from);
            info!(%from, "server registered");
        }
        MessageType::ServerUnregister => {
            let mut guard = inner.guarded.lock().await;
            guard.peers.remove(&from);
            drop(guard);
            inner.observer.on_server_evicted(from);
            info!(%from, "server unregistered");
        }
        MessageType::ClientRegister => {
            let deadline = Instant::now() + inner.settings.client_ttl;
            let mut guard = inner.guarded.lock().await;
            guard.clients.insert(
                from,
                ClientEntry {
                    broadcast_group: msg.broadcast_group,
                    deadline,
                },
            );
            drop(guard);
            inner.observer.on_client_registered(from, msg.broadcast_group);
            info!(%from, group = %msg.broadcast_group, "client registered");
        }
        MessageType::ClientUnregister => {
            let mut guard = inner.guarded.lock().await;
            guard.clients.remove(&from);
            drop(guard);
            inner.observer.on_client_evicted(from);
            info!(%from, "client unregistered");
        }
        MessageType::Broadcast => handle_broadcast(inner, msg).await,
    }
}

async fn handle_broadcast(inner: &Arc<ServerInner>, msg: WireMessage) {
    let (am_master, recipients): (bool, Vec<SocketAddr>) = {
        let guard = inner.guarded.lock().await;
        let am_master = cluster::is_master(&inner.self_endpoint, &guard.peers);
        let recipients = if am_master {
            guard
                .clients
                .iter()
                .filter(|(_, entry)| entry.broadcast_group == msg.broadcast_group)
                .map(|(addr, _)| *addr)
                .collect()
        } else {
            Vec::new()
        };
        (am_master, recipients)
    };

    inner.report_master_state(am_master);

    if !am_master {
        return;
    }

    let fanout = WireMessage::new(
        MessageType::Broadcast,
        Tick::now(),
        msg.source_address,
        msg.broadcast_group,
        msg.payload,
    );
    let fanout = match fanout {
        Ok(m) => m,
        Err(err) => {
            warn!(?err, "failed to rebuild broadcast for fan-out");
            return;
        }
    };

    inner.observer.on_fanout(fanout.broadcast_group, recipients.len());
    inner.send_to_all(&fanout, &recipients).await;
}

async fn tick_loop(inner: Arc<ServerInner>) {
    let mut interval = tokio::time::interval(inner.settings.bk_task_interval);
    let mut next_self_register = Instant::now();

    loop {
        interval.tick().await;

        {
            let guard = inner.guarded.lock().await;
            if guard.state != ServerState::Active {
                return;
            }
        }

        let now = Instant::now();
        let (live_clients, live_peers, is_master) = prune(&inner, now).await;

        if now >= next_self_register {
            let targets = inner.settings.peers.clone();
            let register = WireMessage::administrative(MessageType::ServerRegister, Tick::now());
            inner.send_to_all(&register, &targets).await;
            next_self_register = now + inner.settings.cluster_keep_alive_interval;
        }

        inner.observer.on_tick(live_clients, live_peers, is_master);
    }
}

async fn prune(inner: &Arc<ServerInner>, now: Instant) -> (usize, usize, bool) {
    let mut guard = inner.guarded.lock().await;

    let evicted_clients: Vec<SocketAddr> = guard
        .clients
        .iter()
        .filter(|(_, entry)| entry.deadline <= now)
        .map(|(addr, _)| *addr)
        .collect();
    for addr in &evicted_clients {
        guard.clients.remove(addr);
    }

    let evicted_peers: Vec<SocketAddr> = guard
        .peers
        .iter()
        .filter(|(_, entry)| entry.deadline <= now)
        .map(|(addr, _)| *addr)
        .collect();
    for addr in &evicted_peers {
        guard.peers.remove(addr);
    }

    let live_clients = guard.clients.len();
    let live_peers = guard.peers.len();
    let is_master = cluster::is_master(&inner.self_endpoint, &guard.peers);
    drop(guard);

    inner.report_master_state(is_master);

    for addr in evicted_clients {
        inner.observer.on_client_evicted(addr);
        info!(%addr, "client entry evicted");
    }
    for addr in evicted_peers {
        inner.observer.on_server_evicted(addr);
        info!(%addr, "peer server entry evicted");
    }

    (live_clients, live_peers, is_master)
}
