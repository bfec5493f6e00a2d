//! Peer roster maintenance: a cached set of cluster nodes, refreshed from a
//! bootstrap URL, selected by a fewest-failures / least-loaded policy, with
//! a cool-down after a marked failure.

use crate::rest::RestClient;
use std::time::{Duration, Instant};
use url::Url;

/// One node of the remote cluster. Identity is the normalized `host:port`
/// plus scheme; `last_failure` is `None` until the peer is marked failed,
/// then a monotonic instant.
#[derive(Debug, Clone)]
pub struct Peer {
    pub url: Url,
    pub raw_port: Option<u16>,
    pub raw_is_secure: bool,
    pub flow_file_count: u64,
    pub last_failure: Option<Instant>,
}

impl Peer {
    pub fn new(
        hostname: String,
        raw_port: Option<u16>,
        raw_is_secure: bool,
        flow_file_count: u64,
    ) -> crate::Result<Self> {
        let scheme = if raw_is_secure { "https" } else { "http" };
        let port = raw_port.unwrap_or(if raw_is_secure { 443 } else { 80 });
        let url = Url::parse(&format!("{scheme}://{hostname}:{port}/nifi-api/"))?;
        Ok(Self {
            url,
            raw_port,
            raw_is_secure,
            flow_file_count,
            last_failure: None,
        })
    }

    /// Normalized identity used for equality/ordering: host, port, scheme.
    pub fn identity(&self) -> String {
        format!(
            "{}://{}:{}",
            self.url.scheme(),
            self.url.host_str().unwrap_or_default(),
            self.url.port_or_known_default().unwrap_or(0)
        )
    }
}

const DEFAULT_COOL_DOWN: Duration = Duration::from_secs(30);

/// Maintains the roster of currently known peers for one remote cluster.
pub struct PeerRegistry {
    bootstrap_urls: Vec<Url>,
    rest_clients: Vec<RestClient>,
    peer_update_interval: Option<Duration>,
    cool_down: Duration,
    peers: Vec<Peer>,
    last_refresh: Option<Instant>,
}

impl PeerRegistry {
    pub fn new(rest_clients: Vec<RestClient>, bootstrap_urls: Vec<Url>) -> Self {
        Self {
            bootstrap_urls,
            rest_clients,
            peer_update_interval: None,
            cool_down: DEFAULT_COOL_DOWN,
            peers: Vec::new(),
            last_refresh: None,
        }
    }

    pub fn with_peer_update_interval(mut self, interval: Duration) -> Self {
        self.peer_update_interval = if interval.is_zero() { None } else { Some(interval) };
        self
    }

    /// Seeds the roster directly, bypassing `refresh()`. Useful when the
    /// embedder already knows its peers, or in tests against a stub server
    /// that doesn't serve `/site-to-site/peers`.
    pub fn with_peers(mut self, peers: Vec<Peer>) -> Self {
        self.peers = peers;
        self.last_refresh = Some(Instant::now());
        self
    }

    pub fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = cool_down;
        self
    }

    /// Queries bootstrap URLs in order until one succeeds, then replaces
    /// the roster wholesale.
    pub async fn refresh(&mut self) -> crate::Result<()> {
        let mut last_err = crate::Error::CouldNotLookupPeers;
        for client in &self.rest_clients {
            match client.get_peers().await {
                Ok(peers) => {
                    tracing::debug!(count = peers.len(), "refreshed peer roster");
                    self.peers = peers;
                    self.last_refresh = Some(Instant::now());
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(?err, "bootstrap peer lookup failed, trying next");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    /// Refreshes automatically if periodic refresh is enabled and the last
    /// refresh predates `peer_update_interval`, or if no refresh has
    /// happened yet.
    pub async fn ensure_fresh(&mut self) -> crate::Result<()> {
        let needs_refresh = match (self.last_refresh, self.peer_update_interval) {
            (None, _) => true,
            (Some(last), Some(interval)) => last.elapsed() >= interval,
            (Some(_), None) => false,
        };
        if needs_refresh {
            self.refresh().await?;
        }
        Ok(())
    }

    /// Selects the peer with the minimum `(lastFailure, flowFileCount)`
    /// lexicographic key, ties broken by URL string order, excluding peers
    /// still within their cool-down unless none are eligible, in which case
    /// the oldest failure is chosen.
    pub fn select(&self) -> Option<&Peer> {
        let now = Instant::now();
        let eligible: Vec<&Peer> = self
            .peers
            .iter()
            .filter(|p| match p.last_failure {
                Some(failed_at) => now.duration_since(failed_at) >= self.cool_down,
                None => true,
            })
            .collect();

        let pool = if eligible.is_empty() { self.peers.iter().collect() } else { eligible };

        pool.into_iter().min_by(|a, b| {
            let key = |p: &Peer| (p.last_failure, p.flow_file_count);
            key(a).cmp(&key(b)).then_with(|| a.identity().cmp(&b.identity()))
        })
    }

    pub fn mark_failure(&mut self, identity: &str) {
        if let Some(peer) = self.peers.iter_mut().find(|p| p.identity() == identity) {
            peer.last_failure = Some(Instant::now());
        }
    }

    pub fn clear_failure(&mut self, identity: &str) {
        if let Some(peer) = self.peers.iter_mut().find(|p| p.identity() == identity) {
            peer.last_failure = None;
        }
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn bootstrap_urls(&self) -> &[Url] {
        &self.bootstrap_urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(host: &str, failed_secs_ago: Option<u64>, load: u64) -> Peer {
        let mut p = Peer::new(host.to_string(), Some(8080), false, load).unwrap();
        p.last_failure = failed_secs_ago.map(|s| Instant::now() - Duration::from_secs(s));
        p
    }

    #[test]
    fn select_prefers_no_recent_failure_then_least_loaded() {
        let mut registry = PeerRegistry::new(vec![], vec![]);
        registry.peers = vec![peer("a", Some(1), 1), peer("b", None, 5)];
        let selected = registry.select().unwrap();
        assert_eq!(selected.identity(), peer("b", None, 5).identity());
    }

    #[test]
    fn select_falls_back_to_oldest_failure_when_all_cooling_down() {
        let mut registry = PeerRegistry::new(vec![], vec![]);
        registry.peers = vec![peer("a", Some(2), 0), peer("b", Some(10), 0)];
        let selected = registry.select().unwrap();
        assert_eq!(selected.identity(), peer("b", Some(10), 0).identity());
    }
}
