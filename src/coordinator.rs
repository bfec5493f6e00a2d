//! Drains the durable queue into transactions: age-off and truncation,
//! batch reservation under a generated transaction id, peer selection, and
//! the commit/retry bookkeeping that ties the queue back to the peer
//! registry. Mirrors the polling-loop shape of `automations`' job runner —
//! one `process()` call does one unit of work and returns a status rather
//! than looping internally.

use crate::auth::Credentials;
use crate::config::{RemoteClusterConfig, SiteToSiteClientConfig, TransportProtocol};
use crate::error::Error;
use crate::packet::DataPacket;
use crate::peer::{Peer, PeerRegistry};
use crate::queue::{Queue, QueuedPacketEntity};
use crate::rest::RestClient;
use crate::transaction::http::HttpTransaction;
use crate::transaction::tcp::TcpTransaction;
use crate::transaction::TransactionResult;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Outcome of one `process()` call.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// No free rows were available to batch.
    Empty,
    Processed(TransactionResult),
}

pub struct Coordinator {
    queue: Queue,
    peer_registry: Mutex<PeerRegistry>,
    credentials: Credentials,
    timeout: Duration,
    transport_protocol: TransportProtocol,
    port_name: Option<String>,
    port_id: Option<String>,
    preferred_batch_count: u32,
    preferred_batch_size: u64,
    max_queued_packet_count: i64,
    max_queued_packet_size: i64,
    // Serializes `process()`: at most one batch is ever in flight per queue.
    process_lock: Mutex<()>,
}

impl Coordinator {
    /// `config` carries the global options (port selection, timeout, batch
    /// budgets); `cluster` carries this particular remote cluster's
    /// transport kind and credentials.
    pub fn new(
        queue: Queue,
        peer_registry: PeerRegistry,
        config: &SiteToSiteClientConfig,
        cluster: &RemoteClusterConfig,
    ) -> Self {
        Self {
            queue,
            peer_registry: Mutex::new(peer_registry),
            credentials: cluster.credentials.clone(),
            timeout: config.timeout,
            transport_protocol: cluster.transport_protocol,
            port_name: config.port_name.clone(),
            port_id: config.port_id.clone(),
            preferred_batch_count: config.preferred_batch_count,
            preferred_batch_size: config.preferred_batch_size,
            max_queued_packet_count: config.max_queued_packet_count,
            max_queued_packet_size: config.max_queued_packet_size,
            process_lock: Mutex::new(()),
        }
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Age-off and truncation only, with no batch reservation.
    pub async fn cleanup(&self) -> crate::Result<()> {
        self.queue.age_off_expired().await?;
        if self.queue.count().await? > self.max_queued_packet_count {
            self.queue.truncate_max_rows(self.max_queued_packet_count).await?;
        }
        if self.queue.sum_size().await? > self.max_queued_packet_size {
            self.queue.truncate_max_bytes(self.max_queued_packet_size).await?;
        }
        Ok(())
    }

    /// Drains up to one batch: age-off/truncate, reserve a batch under a
    /// fresh transaction id, select a peer, run the transaction, then
    /// commit or roll back the reservation.
    pub async fn process(&self) -> crate::Result<ProcessOutcome> {
        let _guard = self.process_lock.lock().await;

        self.cleanup().await?;

        let tx_id = Uuid::new_v4().to_string();
        let entities = self
            .queue
            .create_batch(&tx_id, self.preferred_batch_count as i64, self.preferred_batch_size as i64)
            .await?;

        if entities.is_empty() {
            return Ok(ProcessOutcome::Empty);
        }

        let packets = entities_to_packets(&entities)?;

        let (peer, rest) = {
            let mut registry = self.peer_registry.lock().await;
            registry.ensure_fresh().await?;
            let peer = registry.select().cloned().ok_or(Error::CouldNotLookupPeers)?;
            let rest = RestClient::new(peer.url.clone(), self.credentials.clone(), self.timeout)?;
            (peer, rest)
        };

        let port_id = self.resolve_port_id(&rest).await;
        let port_id = match port_id {
            Ok(id) => id,
            Err(err) => {
                self.queue.mark_for_retry(&tx_id).await?;
                self.peer_registry.lock().await.mark_failure(&peer.identity());
                return Err(err);
            }
        };

        let result = match self.transport_protocol {
            TransportProtocol::Http => self.run_http(rest, peer.clone(), &port_id, packets).await,
            TransportProtocol::TcpSocket => self.run_tcp(peer.clone(), &port_id, packets).await,
        };

        match result {
            Ok(result) => {
                self.queue.delete(&tx_id).await?;
                self.peer_registry.lock().await.clear_failure(&peer.identity());
                Ok(ProcessOutcome::Processed(result))
            }
            Err(err) => {
                self.queue.mark_for_retry(&tx_id).await?;
                self.peer_registry.lock().await.mark_failure(&peer.identity());
                Err(err)
            }
        }
    }

    async fn resolve_port_id(&self, rest: &RestClient) -> crate::Result<String> {
        if let Some(id) = &self.port_id {
            return Ok(id.clone());
        }
        let name = self.port_name.as_ref().ok_or(Error::CouldNotLookupInputPorts)?;
        let ports = rest.get_remote_input_ports().await?;
        ports
            .into_iter()
            .find(|p| &p.name == name)
            .map(|p| p.id)
            .ok_or(Error::CouldNotLookupInputPorts)
    }

    async fn run_http(
        &self,
        rest: RestClient,
        peer: Peer,
        port_id: &str,
        packets: Vec<DataPacket>,
    ) -> crate::Result<TransactionResult> {
        let mut txn = HttpTransaction::create(rest, peer, port_id).await?;
        for packet in packets {
            if let Err(err) = txn.send_data(packet).await {
                let _ = txn.cancel().await;
                return Err(err);
            }
        }
        txn.confirm_and_complete().await
    }

    async fn run_tcp(
        &self,
        peer: Peer,
        port_id: &str,
        packets: Vec<DataPacket>,
    ) -> crate::Result<TransactionResult> {
        let host = peer.url.host_str().ok_or_else(|| {
            Error::TransactionInvalidServerResponse("peer url has no host".to_string())
        })?;
        let port = peer.raw_port.unwrap_or_else(|| peer.url.port_or_known_default().unwrap_or(80));

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect((host, port)))
            .await
            .map_err(Error::from)?
            .map_err(Error::Transport)?;

        let mut txn = TcpTransaction::create(stream, peer, port_id, self.timeout, None, None, None).await?;
        for packet in packets {
            if let Err(err) = txn.send_data(packet).await {
                let _ = txn.cancel().await;
                return Err(err);
            }
        }
        txn.confirm_and_complete().await
    }
}

fn entities_to_packets(entities: &[QueuedPacketEntity]) -> crate::Result<Vec<DataPacket>> {
    entities
        .iter()
        .map(|e| Ok(DataPacket::with_bytes(e.attributes()?, e.content_blob.clone())))
        .collect()
}
