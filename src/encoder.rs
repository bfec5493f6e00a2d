//! S2S packet framing: serializes a sequence of [`DataPacket`]s into the
//! wire payload sent in one batch, while tracking a running CRC32 over
//! exactly the bytes produced.

use crate::packet::DataPacket;
use bytes::Bytes;
use std::io;

/// Buffers the framed payload for one transaction and keeps a running
/// CRC32 (IEEE polynomial, reflected in/out, initial/final `0xFFFFFFFF`) of
/// everything appended so far. `crc32fast` implements exactly that variant.
#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
    hasher: crc32fast::Hasher,
    packet_count: u64,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames one packet's attributes and content and appends it to the
    /// payload, folding the bytes into the running checksum. This is the
    /// only place content is read, so a streaming `PacketContent` is
    /// materialized here.
    pub async fn append_data_packet(&mut self, packet: DataPacket) -> io::Result<()> {
        let attributes = packet.attributes().clone();
        let content_length = packet.data_length();
        let content = match packet.into_content() {
            Some(content) => content.materialize().await?,
            None => Bytes::new(),
        };

        let mut frame = Vec::with_capacity(4 + content.len() + 64);
        frame.extend_from_slice(&(attributes.len() as u32).to_be_bytes());
        for (key, value) in &attributes {
            frame.extend_from_slice(&(key.len() as u32).to_be_bytes());
            frame.extend_from_slice(key.as_bytes());
            frame.extend_from_slice(&(value.len() as u32).to_be_bytes());
            frame.extend_from_slice(value.as_bytes());
        }
        frame.extend_from_slice(&(content_length as i64).to_be_bytes());
        frame.extend_from_slice(&content);

        self.append_data(&frame);
        self.packet_count += 1;
        Ok(())
    }

    /// Raw pass-through used by the TCP variant, which interleaves its own
    /// per-packet `CONTINUE_TRANSACTION` / `FINISH_TRANSACTION` markers
    /// around packet frames produced the same way.
    pub fn append_data(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    /// The CRC32 of everything appended so far. Stable once read: further
    /// reads after the transaction has finished appending yield the same
    /// value.
    pub fn crc32(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// A restartable view of the encoded payload, suitable for handing to an
    /// HTTP client as a request body or retried from the beginning after a
    /// transient failure.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn frames_attributes_and_content() {
        let mut attrs = BTreeMap::new();
        attrs.insert("k".to_string(), "v".to_string());
        let packet = DataPacket::with_bytes(attrs, "hello");

        let mut enc = Encoder::new();
        enc.append_data_packet(packet).await.unwrap();

        let bytes = enc.as_bytes();
        assert_eq!(&bytes[0..4], &1u32.to_be_bytes());
        assert_eq!(&bytes[4..8], &1u32.to_be_bytes()); // key len
        assert_eq!(&bytes[8..9], b"k");
        assert_eq!(&bytes[9..13], &1u32.to_be_bytes()); // value len
        assert_eq!(&bytes[13..14], b"v");
        assert_eq!(&bytes[14..22], &5i64.to_be_bytes());
        assert_eq!(&bytes[22..27], b"hello");
        assert_eq!(enc.packet_count(), 1);
    }

    #[tokio::test]
    async fn crc32_is_deterministic() {
        let mut attrs = BTreeMap::new();
        attrs.insert("a".to_string(), "b".to_string());

        let mut first = Encoder::new();
        first
            .append_data_packet(DataPacket::with_bytes(attrs.clone(), "x"))
            .await
            .unwrap();

        let mut second = Encoder::new();
        second
            .append_data_packet(DataPacket::with_bytes(attrs, "x"))
            .await
            .unwrap();

        assert_eq!(first.crc32(), second.crc32());
        assert_eq!(first.crc32(), first.crc32()); // stable on repeated reads
    }

    #[tokio::test]
    async fn append_data_is_raw_passthrough() {
        let mut enc = Encoder::new();
        enc.append_data(b"\x00\x01");
        enc.append_data(b"\x02");
        assert_eq!(enc.as_bytes(), b"\x00\x01\x02");
    }
}
