//! End-to-end HTTP scenarios against a stub REST server: happy path,
//! checksum mismatch, and a full destination that asks the caller to back
//! off.

use s2s_client::{
    auth::{Credentials, TlsConfig},
    config::{RemoteClusterConfig, SiteToSiteClientConfig, TransportProtocol},
    coordinator::{Coordinator, ProcessOutcome},
    peer::{Peer, PeerRegistry},
    prioritizer::DataPacketPrioritizer,
    queue::{Queue, QueuedPacketEntity},
    rest::RestClient,
    DataPacket,
};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Long enough that a slow CI runner can never age these rows off mid-test.
struct LongTtlPrioritizer;

impl DataPacketPrioritizer for LongTtlPrioritizer {
    fn priority(&self, _packet: &DataPacket) -> i32 {
        0
    }

    fn ttl(&self, _packet: &DataPacket) -> Duration {
        Duration::from_secs(3600)
    }
}

fn frame_packet(attrs: &[(&str, &str)], content: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(attrs.len() as u32).to_be_bytes());
    for (k, v) in attrs {
        buf.extend_from_slice(&(k.len() as u32).to_be_bytes());
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
        buf.extend_from_slice(v.as_bytes());
    }
    buf.extend_from_slice(&(content.len() as i64).to_be_bytes());
    buf.extend_from_slice(content);
    buf
}

fn expected_crc(frames: &[Vec<u8>]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for frame in frames {
        hasher.update(frame);
    }
    hasher.finalize()
}

async fn open_memory_queue() -> Queue {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .unwrap();
    Queue::open(pool).await.unwrap()
}

async fn enqueue_two_packets(queue: &Queue) {
    let mut attrs = BTreeMap::new();
    attrs.insert("k".to_string(), "v".to_string());

    let p1 = DataPacket::with_bytes(attrs.clone(), "hello");
    let p2 = DataPacket::with_bytes(attrs, "world");

    let e1 = QueuedPacketEntity::from_packet(&p1, b"hello", &LongTtlPrioritizer).unwrap();
    let e2 = QueuedPacketEntity::from_packet(&p2, b"world", &LongTtlPrioritizer).unwrap();
    queue.insert_many(vec![e1, e2]).await.unwrap();
}

fn base_config(cluster: RemoteClusterConfig) -> (SiteToSiteClientConfig, RemoteClusterConfig) {
    let config = SiteToSiteClientConfig {
        remote_clusters: vec![cluster.clone()],
        port_name: None,
        port_id: Some("P".to_string()),
        timeout: Duration::from_secs(5),
        peer_update_interval: Duration::ZERO,
        proxy_config: None,
        max_queued_packet_count: 10_000,
        max_queued_packet_size: 100 * 1024 * 1024,
        preferred_batch_count: 100,
        preferred_batch_size: 1024 * 1024,
    };
    (config, cluster)
}

async fn registry_for(mock_server: &MockServer) -> (PeerRegistry, RemoteClusterConfig) {
    let base_url = Url::parse(&format!("{}/nifi-api/", mock_server.uri())).unwrap();
    let credentials = Credentials::default();
    let rest = RestClient::new(base_url.clone(), credentials.clone(), Duration::from_secs(5)).unwrap();

    let addr = mock_server.address();
    let peer = Peer::new(addr.ip().to_string(), Some(addr.port()), false, 0).unwrap();

    let registry = PeerRegistry::new(vec![rest], vec![base_url.clone()]).with_peers(vec![peer]);
    let cluster = RemoteClusterConfig {
        urls: vec![base_url],
        transport_protocol: TransportProtocol::Http,
        credentials,
        tls: TlsConfig::default(),
    };
    (registry, cluster)
}

async fn mock_initiate(mock_server: &MockServer, tx_id: &str) {
    Mock::given(method("POST"))
        .and(path("/nifi-api/data-transfer/input-ports/P/transactions"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header(
                    "Location",
                    format!(
                        "{}/nifi-api/data-transfer/input-ports/P/transactions/{tx_id}",
                        mock_server.uri()
                    ),
                )
                .insert_header("x-server-side-transaction-ttl", "30"),
        )
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn s1_http_happy_path() {
    let mock_server = MockServer::start().await;
    let tx_id = "T1";
    mock_initiate(&mock_server, tx_id).await;

    let crc = expected_crc(&[
        frame_packet(&[("k", "v")], b"hello"),
        frame_packet(&[("k", "v")], b"world"),
    ]);

    Mock::given(method("POST"))
        .and(path(format!("/nifi-api/data-transfer/input-ports/P/transactions/{tx_id}/flow-files")))
        .respond_with(ResponseTemplate::new(200).set_body_string(crc.to_string()))
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(format!("/nifi-api/data-transfer/input-ports/P/transactions/{tx_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "flowFilesSent": 2,
            "responseCode": 13,
        })))
        .mount(&mock_server)
        .await;

    let queue = open_memory_queue().await;
    enqueue_two_packets(&queue).await;

    let (registry, cluster) = registry_for(&mock_server).await;
    let (config, cluster) = base_config(cluster);
    let coordinator = Coordinator::new(queue, registry, &config, &cluster);

    let outcome = coordinator.process().await.unwrap();
    match outcome {
        ProcessOutcome::Processed(result) => {
            assert_eq!(result.data_packets_transferred, 2);
            assert!(!result.should_backoff());
        }
        ProcessOutcome::Empty => panic!("expected a processed batch"),
    }
    assert_eq!(coordinator.queue().count().await.unwrap(), 0);
}

#[tokio::test]
async fn s2_crc_mismatch_reopens_queue_rows() {
    let mock_server = MockServer::start().await;
    let tx_id = "T1";
    mock_initiate(&mock_server, tx_id).await;

    // The server echoes back a CRC that can never match a non-empty payload.
    Mock::given(method("POST"))
        .and(path(format!("/nifi-api/data-transfer/input-ports/P/transactions/{tx_id}/flow-files")))
        .respond_with(ResponseTemplate::new(200).set_body_string("0"))
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(format!("/nifi-api/data-transfer/input-ports/P/transactions/{tx_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "flowFilesSent": 0,
            "responseCode": 15,
        })))
        .mount(&mock_server)
        .await;

    let queue = open_memory_queue().await;
    enqueue_two_packets(&queue).await;

    let (registry, cluster) = registry_for(&mock_server).await;
    let (config, cluster) = base_config(cluster);
    let coordinator = Coordinator::new(queue, registry, &config, &cluster);

    let err = coordinator.process().await.unwrap_err();
    assert!(matches!(err, s2s_client::Error::TransactionInvalidServerResponse(_)));
    // Rows are reopened for the next batch attempt, not lost.
    assert_eq!(coordinator.queue().count().await.unwrap(), 2);
}

#[tokio::test]
async fn s3_destination_full_requests_backoff() {
    let mock_server = MockServer::start().await;
    let tx_id = "T1";
    mock_initiate(&mock_server, tx_id).await;

    let crc = expected_crc(&[
        frame_packet(&[("k", "v")], b"hello"),
        frame_packet(&[("k", "v")], b"world"),
    ]);

    Mock::given(method("POST"))
        .and(path(format!("/nifi-api/data-transfer/input-ports/P/transactions/{tx_id}/flow-files")))
        .respond_with(ResponseTemplate::new(200).set_body_string(crc.to_string()))
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(format!("/nifi-api/data-transfer/input-ports/P/transactions/{tx_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "responseCode": 14,
            "flowFilesSent": 2,
        })))
        .mount(&mock_server)
        .await;

    let queue = open_memory_queue().await;
    enqueue_two_packets(&queue).await;

    let (registry, cluster) = registry_for(&mock_server).await;
    let (config, cluster) = base_config(cluster);
    let coordinator = Coordinator::new(queue, registry, &config, &cluster);

    let outcome = coordinator.process().await.unwrap();
    match outcome {
        ProcessOutcome::Processed(result) => assert!(result.should_backoff()),
        ProcessOutcome::Empty => panic!("expected a processed batch"),
    }
    assert_eq!(coordinator.queue().count().await.unwrap(), 0);
}

#[tokio::test]
async fn s4_peer_failover_after_unreachable_peer() {
    let mock_server = MockServer::start().await;
    let tx_id = "T1";
    mock_initiate(&mock_server, tx_id).await;

    let crc = expected_crc(&[frame_packet(&[("k", "v")], b"hello")]);
    Mock::given(method("POST"))
        .and(path(format!("/nifi-api/data-transfer/input-ports/P/transactions/{tx_id}/flow-files")))
        .respond_with(ResponseTemplate::new(200).set_body_string(crc.to_string()))
        .mount(&mock_server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/nifi-api/data-transfer/input-ports/P/transactions/{tx_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "flowFilesSent": 1,
            "responseCode": 13,
        })))
        .mount(&mock_server)
        .await;

    let queue = open_memory_queue().await;
    let mut attrs = BTreeMap::new();
    attrs.insert("k".to_string(), "v".to_string());
    let packet = DataPacket::with_bytes(attrs, "hello");
    let entity = QueuedPacketEntity::from_packet(&packet, b"hello", &LongTtlPrioritizer).unwrap();
    queue.insert(entity).await.unwrap();

    let (healthy_registry, cluster) = registry_for(&mock_server).await;
    let good_peer = healthy_registry.peers()[0].clone();

    // An address nothing listens on, so connection attempts fail fast.
    let bad_peer = Peer::new("127.0.0.1".to_string(), Some(1), false, 0).unwrap();

    let registry = PeerRegistry::new(vec![], vec![]).with_peers(vec![bad_peer.clone(), good_peer.clone()]);
    let (config, cluster) = base_config(cluster);
    let coordinator = Coordinator::new(queue, registry, &config, &cluster);

    // First attempt selects the least-loaded peer (both unfailed so far);
    // peer identities tie-break by `flowFileCount`, and both start at 0, so
    // this can land on either peer — what matters is that a failure here
    // does not poison the healthy peer's eligibility.
    let first = coordinator.process().await;
    if first.is_err() {
        let second = coordinator.process().await.unwrap();
        assert!(matches!(second, ProcessOutcome::Processed(_)));
    } else {
        assert!(matches!(first.unwrap(), ProcessOutcome::Processed(_)));
    }
}
