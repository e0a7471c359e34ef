//! Plain configuration value types. This crate does not load files or read
//! environment variables — it consumes already-parsed settings, optionally
//! built from any key-value source via [`ClientSettings::from_pairs`] /
//! [`ServerSettings::from_pairs`].

use std::net::SocketAddr;
use std::time::Duration;

use broadcast_core::{BroadcastGroup, ConfigError, SharedKey};

/// Local UDP address and port. An unspecified address (`0.0.0.0`) selects
/// any interface.
pub type NetworkBinding = SocketAddr;

/// Conventional UDP port for the broadcast server, used only as a default.
pub const DEFAULT_SERVER_PORT: u16 = 7530;

/// Everything a [`crate::client::BroadcastClient`] needs to start.
#[derive(Clone)]
pub struct ClientSettings {
    pub bind: NetworkBinding,
    pub socket_buffer_size: Option<usize>,
    /// Target server endpoint specs (`host:port` or `address:port`),
    /// periodically re-resolved via DNS.
    pub servers: Vec<String>,
    pub shared_key: SharedKey,
    pub message_ttl: Duration,
    pub broadcast_group: BroadcastGroup,
    pub bk_task_interval: Duration,
    pub keep_alive_interval: Duration,
    pub server_resolve_interval: Duration,
    /// How long the client sleeps after `Starting` completes, so the first
    /// DNS resolution has time to land before the first outbound call.
    pub boot_delay: Duration,
}

impl ClientSettings {
    pub fn new(servers: Vec<String>, shared_key: SharedKey) -> Self {
        ClientSettings {
            bind: "0.0.0.0:0".parse().unwrap(),
            socket_buffer_size: None,
            servers,
            shared_key,
            message_ttl: Duration::from_secs(15 * 60),
            broadcast_group: BroadcastGroup::new(0),
            bk_task_interval: Duration::from_secs(1),
            keep_alive_interval: Duration::from_secs(30),
            server_resolve_interval: Duration::from_secs(5 * 60),
            boot_delay: Duration::from_secs(2),
        }
    }

    /// Builds settings from a generic key-value source, recognizing the
    /// option names from the external interface: `NetworkBinding`,
    /// `SocketBufferSize`, `Servers` (comma-separated), `SharedKey` (hex),
    /// `MessageTTL`, `BroadcastGroup`, `BkTaskInterval`,
    /// `KeepAliveInterval`, `ServerResolveInterval` (all durations in
    /// seconds). Unrecognized keys are ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut servers = Vec::new();
        let mut shared_key = None;
        let mut settings = ClientSettings::new(Vec::new(), SharedKey::from_bytes([0u8; 32]));

        for (k, v) in pairs {
            let (k, v) = (k.as_ref(), v.as_ref());
            match k {
                "NetworkBinding" => settings.bind = parse_endpoint(v)?,
                "SocketBufferSize" => settings.socket_buffer_size = v.parse().ok(),
                "Servers" => servers = v.split(',').map(|s| s.trim().to_string()).collect(),
                "SharedKey" => shared_key = Some(parse_hex_key(v)?),
                "MessageTTL" => settings.message_ttl = parse_seconds(v)?,
                "BroadcastGroup" => settings.broadcast_group = parse_group(v)?,
                "BkTaskInterval" => settings.bk_task_interval = parse_seconds(v)?,
                "KeepAliveInterval" => settings.keep_alive_interval = parse_seconds(v)?,
                "ServerResolveInterval" => settings.server_resolve_interval = parse_seconds(v)?,
                "BootDelay" => settings.boot_delay = parse_seconds(v)?,
                _ => {}
            }
        }

        settings.servers = servers;
        if let Some(key) = shared_key {
            settings.shared_key = key;
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::EmptyServerList);
        }
        for spec in &self.servers {
            validate_endpoint_spec(spec)?;
        }
        require_positive(self.message_ttl, "MessageTTL")?;
        require_positive(self.keep_alive_interval, "KeepAliveInterval")?;
        require_positive(self.server_resolve_interval, "ServerResolveInterval")?;
        require_positive(self.bk_task_interval, "BkTaskInterval")?;
        Ok(())
    }
}

/// Everything a [`crate::server::BroadcastServer`] needs to start.
#[derive(Clone)]
pub struct ServerSettings {
    pub bind: NetworkBinding,
    pub socket_buffer_size: Option<usize>,
    /// Static cluster peer list, including self.
    pub peers: Vec<SocketAddr>,
    pub shared_key: SharedKey,
    pub message_ttl: Duration,
    pub bk_task_interval: Duration,
    pub cluster_keep_alive_interval: Duration,
    pub server_ttl: Duration,
    pub client_ttl: Duration,
    /// How long `Closing` sleeps after sending `ServerUnregister`, so
    /// in-flight broadcasts can be handled by the newly elected master.
    pub close_linger: Duration,
}

impl ServerSettings {
    pub fn new(peers: Vec<SocketAddr>, shared_key: SharedKey) -> Self {
        ServerSettings {
            bind: SocketAddr::new(std::net::Ipv4Addr::UNSPECIFIED.into(), DEFAULT_SERVER_PORT),
            socket_buffer_size: None,
            peers,
            shared_key,
            message_ttl: Duration::from_secs(15 * 60),
            bk_task_interval: Duration::from_secs(1),
            cluster_keep_alive_interval: Duration::from_secs(15),
            server_ttl: Duration::from_secs(50),
            client_ttl: Duration::from_secs(95),
            close_linger: Duration::from_secs(2),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut peers = Vec::new();
        let mut shared_key = None;
        let mut settings = ServerSettings::new(Vec::new(), SharedKey::from_bytes([0u8; 32]));

        for (k, v) in pairs {
            let (k, v) = (k.as_ref(), v.as_ref());
            match k {
                "NetworkBinding" => settings.bind = parse_endpoint(v)?,
                "SocketBufferSize" => settings.socket_buffer_size = v.parse().ok(),
                "Servers" => {
                    for spec in v.split(',') {
                        peers.push(parse_endpoint(spec.trim())?);
                    }
                }
                "SharedKey" => shared_key = Some(parse_hex_key(v)?),
                "MessageTTL" => settings.message_ttl = parse_seconds(v)?,
                "BkTaskInterval" => settings.bk_task_interval = parse_seconds(v)?,
                "ClusterKeepAliveInterval" => settings.cluster_keep_alive_interval = parse_seconds(v)?,
                "ServerTTL" => settings.server_ttl = parse_seconds(v)?,
                "ClientTTL" => settings.client_ttl = parse_seconds(v)?,
                "CloseLinger" => settings.close_linger = parse_seconds(v)?,
                _ => {}
            }
        }

        settings.peers = peers;
        if let Some(key) = shared_key {
            settings.shared_key = key;
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peers.is_empty() {
            return Err(ConfigError::EmptyServerList);
        }
        require_positive(self.message_ttl, "MessageTTL")?;
        require_positive(self.cluster_keep_alive_interval, "ClusterKeepAliveInterval")?;
        require_positive(self.server_ttl, "ServerTTL")?;
        require_positive(self.client_ttl, "ClientTTL")?;
        require_positive(self.bk_task_interval, "BkTaskInterval")?;
        Ok(())
    }

    /// The endpoint this server should look for in its own peer list: the
    /// configured bind address, with an unspecified address substituted by
    /// loopback for matching purposes (spec 4.4).
    pub fn self_match_endpoint(&self) -> SocketAddr {
        if self.bind.ip().is_unspecified() {
            SocketAddr::new(std::net::Ipv4Addr::LOCALHOST.into(), self.bind.port())
        } else {
            self.bind
        }
    }
}

fn require_positive(d: Duration, name: &'static str) -> Result<(), ConfigError> {
    if d.is_zero() {
        Err(ConfigError::NonPositiveTtl(name))
    } else {
        Ok(())
    }
}

fn parse_seconds(v: &str) -> Result<Duration, ConfigError> {
    v.parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| ConfigError::MalformedEndpoint(v.to_string()))
}

fn parse_group(v: &str) -> Result<BroadcastGroup, ConfigError> {
    v.parse::<i64>()
        .ok()
        .and_then(|n| BroadcastGroup::try_from(n).ok())
        .ok_or_else(|| ConfigError::MalformedEndpoint(v.to_string()))
}

fn parse_endpoint(v: &str) -> Result<SocketAddr, ConfigError> {
    v.parse()
        .map_err(|_| ConfigError::MalformedEndpoint(v.to_string()))
}

fn parse_hex_key(v: &str) -> Result<SharedKey, ConfigError> {
    let bytes = hex_decode(v).ok_or_else(|| ConfigError::MalformedEndpoint(v.to_string()))?;
    if bytes.len() != 32 {
        return Err(ConfigError::MalformedEndpoint(v.to_string()));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(SharedKey::from_bytes(arr))
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// Light syntactic check that a client server-spec at least has a
/// `host:port` shape; the actual address is resolved later via DNS.
fn validate_endpoint_spec(spec: &str) -> Result<(), ConfigError> {
    let (host, port) = spec
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::MalformedEndpoint(spec.to_string()))?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(ConfigError::MalformedEndpoint(spec.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_server_list_fails_construction() {
        let settings = ClientSettings::new(Vec::new(), SharedKey::from_bytes([1u8; 32]));
        assert_eq!(settings.validate(), Err(ConfigError::EmptyServerList));
    }

    #[test]
    fn malformed_endpoint_spec_fails_construction() {
        let settings = ClientSettings::new(
            vec!["not-an-endpoint".to_string()],
            SharedKey::from_bytes([1u8; 32]),
        );
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::MalformedEndpoint(_))
        ));
    }

    #[test]
    fn non_positive_ttl_fails_construction() {
        let mut settings =
            ClientSettings::new(vec!["127.0.0.1:7530".to_string()], SharedKey::from_bytes([1u8; 32]));
        settings.message_ttl = Duration::ZERO;
        assert_eq!(
            settings.validate(),
            Err(ConfigError::NonPositiveTtl("MessageTTL"))
        );
    }

    #[test]
    fn from_pairs_parses_recognized_options() {
        let pairs = vec![
            ("Servers", "10.0.0.1:7530, 10.0.0.2:7530"),
            ("MessageTTL", "60"),
            ("BroadcastGroup", "3"),
            ("KeepAliveInterval", "5"),
        ];
        let settings = ClientSettings::from_pairs(pairs).unwrap();
        assert_eq!(settings.servers, vec!["10.0.0.1:7530", "10.0.0.2:7530"]);
        assert_eq!(settings.message_ttl, Duration::from_secs(60));
        assert_eq!(settings.broadcast_group.get(), 3);
        assert_eq!(settings.keep_alive_interval, Duration::from_secs(5));
    }

    #[test]
    fn server_self_match_substitutes_loopback_for_unspecified_bind() {
        let settings = ServerSettings::new(
            vec!["127.0.0.1:7530".parse().unwrap()],
            SharedKey::from_bytes([1u8; 32]),
        );
        assert_eq!(
            settings.self_match_endpoint(),
            "127.0.0.1:7530".parse::<SocketAddr>().unwrap()
        );
    }
}
