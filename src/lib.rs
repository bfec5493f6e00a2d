//! Client library for transmitting batches of attributed binary records
//! ("data packets") from an edge device to a remote dataflow cluster over
//! the bidirectional Site-to-Site (S2S) protocol.
//!
//! A producer [`enqueue`](client::SiteToSiteClient::enqueue)s packets into a
//! durable, priority-ordered queue; the [`coordinator::Coordinator`] drains
//! it into [`transaction`] engine runs against a peer chosen by
//! [`peer::PeerRegistry`], over either the HTTP-framed or TCP-framed variant
//! of the protocol.

pub mod auth;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod encoder;
pub mod error;
pub mod packet;
pub mod peer;
pub mod prioritizer;
pub mod queue;
pub mod rest;
pub mod transaction;
pub mod transport;
mod util;

pub use client::SiteToSiteClient;
pub use config::{RemoteClusterConfig, SiteToSiteClientConfig, TransportProtocol};
pub use coordinator::{Coordinator, ProcessOutcome};
pub use error::{ConfirmError, Error, Result};
pub use packet::{DataPacket, PacketContent};
pub use peer::{Peer, PeerRegistry};
pub use prioritizer::{DataPacketPrioritizer, DefaultPrioritizer};
pub use queue::{Queue, QueuedPacketEntity};
pub use transaction::{TransactionResponseCode, TransactionResult, TransactionState};
