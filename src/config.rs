//! Configuration surface, expressed as plain `serde`-deserializable
//! structs with `Default` impls carrying the documented defaults, the way
//! `models`/`flow-client-next` shape their config types.

use crate::auth::{Credentials, TlsConfig};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TransportProtocol {
    Http,
    TcpSocket,
}

impl Default for TransportProtocol {
    fn default() -> Self {
        TransportProtocol::Http
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    pub url: Option<Url>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// One remote cluster to send to: its bootstrap URLs, transport kind, and
/// credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteClusterConfig {
    pub urls: Vec<Url>,
    #[serde(default)]
    pub transport_protocol: TransportProtocol,
    #[serde(default, skip_deserializing)]
    pub credentials: Credentials,
    #[serde(default, skip_deserializing)]
    pub tls: TlsConfig,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_preferred_batch_count() -> u32 {
    100
}

fn default_preferred_batch_size() -> u64 {
    1024 * 1024
}

/// Top-level client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteToSiteClientConfig {
    pub remote_clusters: Vec<RemoteClusterConfig>,

    pub port_name: Option<String>,
    pub port_id: Option<String>,

    #[serde(default = "default_timeout", with = "seconds_duration")]
    pub timeout: Duration,

    /// 0 disables periodic peer refresh.
    #[serde(default, with = "seconds_duration")]
    pub peer_update_interval: Duration,

    #[serde(default)]
    pub proxy_config: Option<ProxyConfig>,

    #[serde(default = "default_max_queued_packet_count")]
    pub max_queued_packet_count: i64,

    #[serde(default = "default_max_queued_packet_size")]
    pub max_queued_packet_size: i64,

    #[serde(default = "default_preferred_batch_count")]
    pub preferred_batch_count: u32,

    #[serde(default = "default_preferred_batch_size")]
    pub preferred_batch_size: u64,
}

fn default_max_queued_packet_count() -> i64 {
    crate::queue::DEFAULT_MAX_QUEUED_PACKET_COUNT
}

fn default_max_queued_packet_size() -> i64 {
    crate::queue::DEFAULT_MAX_QUEUED_PACKET_SIZE
}

impl Default for SiteToSiteClientConfig {
    fn default() -> Self {
        Self {
            remote_clusters: Vec::new(),
            port_name: None,
            port_id: None,
            timeout: default_timeout(),
            peer_update_interval: Duration::ZERO,
            proxy_config: None,
            max_queued_packet_count: crate::queue::DEFAULT_MAX_QUEUED_PACKET_COUNT,
            max_queued_packet_size: crate::queue::DEFAULT_MAX_QUEUED_PACKET_SIZE,
            preferred_batch_count: default_preferred_batch_count(),
            preferred_batch_size: default_preferred_batch_size(),
        }
    }
}

/// Minimal duration (de)serializer so `timeout` can be written as
/// `"30s"` in config files without pulling in a crate just for this.
mod seconds_duration {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
