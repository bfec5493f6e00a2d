//! Prioritizer policy is supplied by the embedder: a small two-method
//! capability consulted only at enqueue time to compute a packet's
//! `priority` and `expires_at`, never on the hot send path.

use crate::packet::DataPacket;
use std::time::Duration;

pub trait DataPacketPrioritizer: Send + Sync {
    /// Lower values sort first; ties are broken by insertion order.
    fn priority(&self, packet: &DataPacket) -> i32;

    /// Time-to-live from the moment of enqueue, after which the packet is
    /// eligible for age-off.
    fn ttl(&self, packet: &DataPacket) -> Duration;
}

/// The default prioritizer: priority 0, ttl 1 second.
pub struct DefaultPrioritizer;

impl DataPacketPrioritizer for DefaultPrioritizer {
    fn priority(&self, _packet: &DataPacket) -> i32 {
        0
    }

    fn ttl(&self, _packet: &DataPacket) -> Duration {
        Duration::from_secs(1)
    }
}
