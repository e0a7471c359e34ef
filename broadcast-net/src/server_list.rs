//! Client-owned mapping from configured endpoint specs to resolved IPv4
//! socket addresses, rebuilt periodically by DNS resolution.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;

/// Resolved server list, keyed by the originally configured spec string so
/// re-resolution can be logged per spec.
#[derive(Debug, Clone, Default)]
pub struct ServerList {
    resolved: HashMap<String, Vec<SocketAddr>>,
}

impl ServerList {
    pub fn empty() -> Self {
        ServerList {
            resolved: HashMap::new(),
        }
    }

    /// Re-resolves every configured spec via DNS lookup, IPv4 only (the
    /// overlay does not support IPv6).
    pub async fn resolve(specs: &[String], previous: &ServerList) -> ServerList {
        Self::resolve_with(specs, previous, real_lookup).await
    }

    /// Same as [`resolve`] but with an injectable resolver, so tests can
    /// exercise the "DNS hiccup keeps previous addresses" path without a
    /// real network lookup.
    pub async fn resolve_with<F, Fut>(specs: &[String], previous: &ServerList, resolver: F) -> ServerList
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = io::Result<Vec<SocketAddr>>>,
    {
        let mut resolved = HashMap::with_capacity(specs.len());
        for spec in specs {
            match resolver(spec.clone()).await {
                Ok(addrs) if !addrs.is_empty() => {
                    resolved.insert(spec.clone(), addrs);
                }
                _ => {
                    if let Some(prev) = previous.resolved.get(spec) {
                        resolved.insert(spec.clone(), prev.clone());
                    }
                }
            }
        }
        ServerList { resolved }
    }

    /// Every currently known target address, one send target per entry.
    pub fn targets(&self) -> Vec<SocketAddr> {
        self.resolved.values().flatten().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.values().all(|v| v.is_empty())
    }
}

async fn real_lookup(spec: String) -> io::Result<Vec<SocketAddr>> {
    let addrs = tokio::net::lookup_host(spec).await?;
    Ok(addrs.filter(|a| a.is_ipv4()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_literal_ip_specs() {
        let specs = vec!["127.0.0.1:7530".to_string()];
        let list = ServerList::resolve(&specs, &ServerList::empty()).await;
        assert_eq!(list.targets(), vec!["127.0.0.1:7530".parse().unwrap()]);
    }

    #[tokio::test]
    async fn keeps_previous_addresses_on_resolution_failure() {
        let mut previous = HashMap::new();
        previous.insert(
            "flaky.example:7530".to_string(),
            vec!["10.0.0.9:7530".parse().unwrap()],
        );
        let previous = ServerList { resolved: previous };

        let specs = vec!["flaky.example:7530".to_string()];
        let list = ServerList::resolve_with(&specs, &previous, |_spec| async {
            Err::<Vec<SocketAddr>, _>(io::Error::new(io::ErrorKind::Other, "simulated dns failure"))
        })
        .await;
        assert_eq!(list.targets(), vec!["10.0.0.9:7530".parse().unwrap()]);
    }

    #[tokio::test]
    async fn empty_resolution_with_no_previous_yields_empty_list() {
        let specs = vec!["flaky.example:7530".to_string()];
        let list = ServerList::resolve_with(&specs, &ServerList::empty(), |_spec| async {
            Ok(Vec::new())
        })
        .await;
        assert!(list.is_empty());
    }
}
