//! The raw byte transport is an external collaborator: something that can
//! connect, read/write with a deadline, and close. This module names the
//! interface the TCP transaction engine drives; TLS upgrade, if any,
//! happens before a `Transport` reaches the engine.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A framed, timeout-bounded byte stream. Every blocking call carries the
/// deadline derived from the client's configured timeout; expiry must
/// surface as `std::io::ErrorKind::TimedOut`.
#[async_trait]
pub trait Transport: Send {
    async fn write_all(&mut self, buf: &[u8], timeout: Duration) -> std::io::Result<()>;
    async fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<()>;
    async fn close(&mut self) -> std::io::Result<()>;
}

#[async_trait]
impl Transport for TcpStream {
    async fn write_all(&mut self, buf: &[u8], timeout: Duration) -> std::io::Result<()> {
        tokio::time::timeout(timeout, AsyncWriteExt::write_all(self, buf))
            .await
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))?
    }

    async fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<()> {
        tokio::time::timeout(timeout, AsyncReadExt::read_exact(self, buf))
            .await
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))?
            .map(|_| ())
    }

    async fn close(&mut self) -> std::io::Result<()> {
        AsyncWriteExt::shutdown(self).await
    }
}

/// Convenience helpers layered over any `Transport` for the length-prefixed
/// framing the TCP variant uses throughout: `u16`-prefixed UTF-8 strings
/// and big-endian integers.
pub struct FramedIo<'a, T: Transport + ?Sized> {
    pub transport: &'a mut T,
    pub timeout: Duration,
}

impl<'a, T: Transport + ?Sized> FramedIo<'a, T> {
    pub fn new(transport: &'a mut T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub async fn write_u32(&mut self, v: u32) -> std::io::Result<()> {
        self.transport.write_all(&v.to_be_bytes(), self.timeout).await
    }

    pub async fn write_u8(&mut self, v: u8) -> std::io::Result<()> {
        self.transport.write_all(&[v], self.timeout).await
    }

    pub async fn read_u8(&mut self) -> std::io::Result<u8> {
        let mut buf = [0u8; 1];
        self.transport.read_exact(&mut buf, self.timeout).await?;
        Ok(buf[0])
    }

    pub async fn read_u32(&mut self) -> std::io::Result<u32> {
        let mut buf = [0u8; 4];
        self.transport.read_exact(&mut buf, self.timeout).await?;
        Ok(u32::from_be_bytes(buf))
    }

    pub async fn write_string(&mut self, s: &str) -> std::io::Result<()> {
        let bytes = s.as_bytes();
        let len: u16 = bytes.len().try_into().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "string too long for u16 frame")
        })?;
        self.transport.write_all(&len.to_be_bytes(), self.timeout).await?;
        self.transport.write_all(bytes, self.timeout).await
    }

    pub async fn read_string(&mut self) -> std::io::Result<String> {
        let mut len_buf = [0u8; 2];
        self.transport.read_exact(&mut len_buf, self.timeout).await?;
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        self.transport.read_exact(&mut buf, self.timeout).await?;
        String::from_utf8(buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub async fn write_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.transport.write_all(bytes, self.timeout).await
    }
}
