use bytes::Bytes;
use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt};

/// The content half of a [`DataPacket`]: either the bytes are already in
/// memory, or they are produced lazily by something that knows its own
/// length up front (e.g. a file handle). `data_length` must always equal
/// the number of bytes the source yields.
pub enum PacketContent {
    Bytes(Bytes),
    Stream {
        data_length: u64,
        reader: Pin<Box<dyn AsyncRead + Send>>,
    },
}

impl PacketContent {
    pub fn data_length(&self) -> u64 {
        match self {
            PacketContent::Bytes(b) => b.len() as u64,
            PacketContent::Stream { data_length, .. } => *data_length,
        }
    }

    /// Drains the content into a single buffer. For the `Bytes` variant this
    /// is a cheap clone; for `Stream` it consumes the reader.
    pub async fn materialize(self) -> io::Result<Bytes> {
        match self {
            PacketContent::Bytes(b) => Ok(b),
            PacketContent::Stream {
                data_length,
                mut reader,
            } => {
                let mut buf = Vec::with_capacity(data_length as usize);
                reader.read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl std::fmt::Debug for PacketContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketContent::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            PacketContent::Stream { data_length, .. } => {
                f.debug_struct("Stream").field("data_length", data_length).finish()
            }
        }
    }
}

/// An ordered, unique-keyed mapping of string attributes plus optional
/// opaque content. Keys are unique by construction (`BTreeMap`), which also
/// gives deterministic iteration order for framing.
#[derive(Debug)]
pub struct DataPacket {
    attributes: BTreeMap<String, String>,
    content: Option<PacketContent>,
}

impl DataPacket {
    pub fn new(attributes: BTreeMap<String, String>, content: Option<PacketContent>) -> Self {
        Self { attributes, content }
    }

    pub fn with_bytes(attributes: BTreeMap<String, String>, content: impl Into<Bytes>) -> Self {
        Self {
            attributes,
            content: Some(PacketContent::Bytes(content.into())),
        }
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn content(&self) -> Option<&PacketContent> {
        self.content.as_ref()
    }

    pub fn into_content(self) -> Option<PacketContent> {
        self.content
    }

    /// The number of bytes `content`, if any, will yield: always equal to
    /// the content source's declared length.
    pub fn data_length(&self) -> u64 {
        self.content.as_ref().map(PacketContent::data_length).unwrap_or(0)
    }

    /// Rough estimate used for queue accounting: attribute bytes plus
    /// content bytes, matching `QueuedPacketEntity::estimatedSize`.
    pub fn estimated_size(&self) -> u64 {
        let attrs: u64 = self
            .attributes
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum();
        attrs + self.data_length()
    }
}
