//! The library's public entry point. Wires a [`Coordinator`], a
//! [`PeerRegistry`], and a queue handle together behind `enqueue`/`process`,
//! the way `flow-client-next::rest::Client::new` or
//! `gazette::journal::Client::new` give callers one constructor and a small
//! surface instead of exposing the pieces they compose.

use crate::auth::Credentials;
use crate::config::SiteToSiteClientConfig;
use crate::coordinator::{Coordinator, ProcessOutcome};
use crate::packet::DataPacket;
use crate::peer::PeerRegistry;
use crate::prioritizer::{DataPacketPrioritizer, DefaultPrioritizer};
use crate::queue::{Queue, QueuedPacketEntity};
use crate::rest::RestClient;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// A ready-to-use client for one remote cluster: an enqueue-only producer
/// side and a drain side driven by [`Self::process`] / [`Self::run_forever`].
pub struct SiteToSiteClient {
    coordinator: Arc<Coordinator>,
    prioritizer: Arc<dyn DataPacketPrioritizer + Send + Sync>,
}

impl SiteToSiteClient {
    /// Builds the client against the first configured remote cluster. The
    /// `pool` is the already-opened SQLite pool the queue should use;
    /// callers may point several clients at the same pool.
    pub async fn new(config: SiteToSiteClientConfig, pool: SqlitePool) -> crate::Result<Self> {
        let cluster = config
            .remote_clusters
            .first()
            .ok_or_else(|| crate::Error::RestApiClientCouldNotFormURL("no remote clusters configured".into()))?
            .clone();

        let queue = Queue::open(pool)
            .await?
            .with_limits(config.max_queued_packet_count, config.max_queued_packet_size);

        let rest_clients = cluster
            .urls
            .iter()
            .map(|url| RestClient::new(url.clone(), cluster.credentials.clone(), config.timeout))
            .collect::<crate::Result<Vec<_>>>()?;

        let mut registry = PeerRegistry::new(rest_clients, cluster.urls.clone());
        registry = registry.with_peer_update_interval(config.peer_update_interval);
        registry.ensure_fresh().await?;

        let coordinator = Coordinator::new(queue, registry, &config, &cluster);

        Ok(Self {
            coordinator: Arc::new(coordinator),
            prioritizer: Arc::new(DefaultPrioritizer),
        })
    }

    pub fn with_prioritizer(mut self, prioritizer: Arc<dyn DataPacketPrioritizer + Send + Sync>) -> Self {
        self.prioritizer = prioritizer;
        self
    }

    /// Enqueues one packet, materializing its content and computing
    /// `priority`/`expiresAtMillis` via the configured prioritizer.
    pub async fn enqueue(&self, packet: DataPacket) -> crate::Result<()> {
        self.enqueue_all(vec![packet]).await
    }

    pub async fn enqueue_all(&self, packets: Vec<DataPacket>) -> crate::Result<()> {
        let mut entities = Vec::with_capacity(packets.len());
        for packet in packets {
            let attributes = packet.attributes().clone();
            let content = match packet.into_content() {
                Some(content) => content.materialize().await.map_err(crate::Error::Transport)?,
                None => bytes::Bytes::new(),
            };
            let view = DataPacket::with_bytes(attributes, content.clone());
            entities.push(QueuedPacketEntity::from_packet(&view, &content, self.prioritizer.as_ref())?);
        }
        self.coordinator.queue().insert_many(entities).await
    }

    /// Runs `process()` once.
    pub async fn process(&self) -> crate::Result<ProcessOutcome> {
        self.coordinator.process().await
    }

    /// Calls `process()` in a loop, sleeping `interval` between calls and
    /// honoring `shouldBackoff()` by doubling the sleep once.
    pub async fn run_forever(&self, interval: Duration) -> ! {
        loop {
            match self.coordinator.process().await {
                Ok(ProcessOutcome::Processed(result)) if result.should_backoff() => {
                    tracing::info!("destination full, backing off");
                    tokio::time::sleep(interval * 2).await;
                }
                Ok(_) => tokio::time::sleep(interval).await,
                Err(err) => {
                    tracing::warn!(?err, "process() failed");
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    pub fn queue(&self) -> &Queue {
        self.coordinator.queue()
    }
}
