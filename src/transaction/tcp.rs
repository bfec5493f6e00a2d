//! TCP socket transaction engine. Drives the same state machine as the
//! HTTP variant, but over a raw, length-prefixed socket protocol instead
//! of REST calls — handshake, then real-time data exchange instead of
//! buffer-then-send.

use super::{TransactionCore, TransactionResponseCode, TransactionResult, TransactionState};
use crate::error::{ConfirmError, Error};
use crate::packet::DataPacket;
use crate::peer::Peer;
use crate::transport::{FramedIo, Transport};
use std::time::{Duration, Instant};

const MAGIC: &[u8; 4] = b"NiFi";
const CLIENT_VERSION: u32 = 5;

pub struct TcpTransaction<T: Transport> {
    core: TransactionCore,
    transport: T,
    timeout: Duration,
}

impl<T: Transport> TcpTransaction<T> {
    /// `create`: magic + version negotiation + handshake properties. Any
    /// response code other than `PropertiesOk` is a
    /// `TransactionInvalidServerResponse`.
    pub async fn create(
        mut transport: T,
        peer: Peer,
        port_id: &str,
        timeout: Duration,
        batch_count: Option<u32>,
        batch_size: Option<u64>,
        batch_duration: Option<Duration>,
    ) -> crate::Result<Self> {
        {
            let mut io = FramedIo::new(&mut transport, timeout);
            io.write_bytes(MAGIC).await.map_err(Error::Transport)?;
            io.write_u32(CLIENT_VERSION).await.map_err(Error::Transport)?;

            let code = io.read_u8().await.map_err(Error::Transport)?;
            match TransactionResponseCode::from_byte(code) {
                TransactionResponseCode::MoreData => {
                    // Server's code 20 here signals its accepted version;
                    // nothing further to negotiate in that case.
                }
                TransactionResponseCode::NoMoreData => {
                    let server_version = io.read_u32().await.map_err(Error::Transport)?;
                    if server_version == 0 || server_version > CLIENT_VERSION {
                        return Err(Error::TransactionInvalidServerResponse(format!(
                            "unsupported protocol version {server_version}"
                        )));
                    }
                }
                other => {
                    return Err(Error::TransactionInvalidServerResponse(format!(
                        "unexpected response during version negotiation: {other:?}"
                    )))
                }
            }

            let mut properties = vec![
                ("GZIP".to_string(), "false".to_string()),
                ("PORT_IDENTIFIER".to_string(), port_id.to_string()),
                (
                    "REQUEST_EXPIRATION_MILLIS".to_string(),
                    timeout.as_millis().to_string(),
                ),
            ];
            if let Some(n) = batch_count {
                properties.push(("BATCH_COUNT".to_string(), n.to_string()));
            }
            if let Some(n) = batch_size {
                properties.push(("BATCH_SIZE".to_string(), n.to_string()));
            }
            if let Some(d) = batch_duration {
                properties.push(("BATCH_DURATION".to_string(), d.as_millis().to_string()));
            }

            io.write_u32(properties.len() as u32).await.map_err(Error::Transport)?;
            for (key, value) in &properties {
                io.write_string(key).await.map_err(Error::Transport)?;
                io.write_string(value).await.map_err(Error::Transport)?;
            }

            let response = io.read_u8().await.map_err(Error::Transport)?;
            if TransactionResponseCode::from_byte(response) != TransactionResponseCode::PropertiesOk {
                return Err(Error::TransactionInvalidServerResponse(format!(
                    "handshake rejected: {:?}",
                    TransactionResponseCode::from_byte(response)
                )));
            }
        }

        Ok(TcpTransaction {
            core: TransactionCore::new(peer),
            transport,
            timeout,
        })
    }

    /// Writes `CONTINUE_TRANSACTION` followed by one packet's attribute/
    /// content frame.
    pub async fn send_data(&mut self, packet: DataPacket) -> crate::Result<()> {
        self.core.ensure_not_terminal()?;

        let start = self.core.encoder.len();
        self.core
            .encoder
            .append_data_packet(packet)
            .await
            .map_err(Error::Transport)?;
        let frame = self.core.encoder.as_bytes()[start..].to_vec();

        let mut io = FramedIo::new(&mut self.transport, self.timeout);
        io.write_u8(TransactionResponseCode::ContinueTransaction as u8)
            .await
            .map_err(Error::Transport)?;
        io.write_bytes(&frame).await.map_err(Error::Transport)?;

        self.core.state = TransactionState::DataExchanged;
        Ok(())
    }

    /// `FINISH_TRANSACTION`, then confirmation and completion.
    pub async fn confirm_and_complete(mut self) -> crate::Result<TransactionResult> {
        self.core.ensure_not_terminal()?;
        let started = Instant::now();
        let local_crc = self.core.encoder.crc32();

        let mut io = FramedIo::new(&mut self.transport, self.timeout);
        io.write_u8(TransactionResponseCode::FinishTransaction as u8)
            .await
            .map_err(Error::Transport)?;

        let confirm_code = io.read_u8().await.map_err(Error::Transport)?;
        if TransactionResponseCode::from_byte(confirm_code) != TransactionResponseCode::ConfirmTransaction {
            self.core.state = TransactionState::TransactionError;
            return Err(Error::TransactionInvalidServerResponse(format!(
                "expected CONFIRM_TRANSACTION, got {:?}",
                TransactionResponseCode::from_byte(confirm_code)
            )));
        }

        let server_crc_text = io.read_string().await.map_err(Error::Transport)?;
        let server_crc = crate::util::parse_crc32_ascii(&server_crc_text)?;

        if server_crc != local_crc {
            let mismatch = ConfirmError::ChecksumMismatch {
                local: local_crc,
                server: server_crc,
                response_code: TransactionResponseCode::BadChecksum,
            };
            tracing::warn!(local_crc, server_crc, %mismatch, "tcp checksum mismatch");
            io.write_u8(TransactionResponseCode::BadChecksum as u8)
                .await
                .map_err(Error::Transport)?;
            self.core.state = TransactionState::TransactionError;
            let _ = self.transport.close().await;
            return Err(mismatch.into());
        }

        self.core.state = TransactionState::TransactionConfirmed;
        io.write_u8(TransactionResponseCode::ConfirmTransaction as u8)
            .await
            .map_err(Error::Transport)?;
        io.write_string("").await.map_err(Error::Transport)?; // empty "OK" ack

        let completion_code = io.read_u8().await.map_err(Error::Transport)?;
        let response_code = TransactionResponseCode::from_byte(completion_code);
        let explanation = io.read_string().await.ok().filter(|s| !s.is_empty());

        match response_code {
            TransactionResponseCode::TransactionFinished
            | TransactionResponseCode::TransactionFinishedButDestinationFull => {
                self.core.state = TransactionState::TransactionCompleted;
                let _ = self.transport.close().await;
                Ok(TransactionResult {
                    response_code,
                    data_packets_transferred: self.core.encoder.packet_count(),
                    message: explanation,
                    duration: started.elapsed(),
                })
            }
            other => {
                self.core.state = TransactionState::TransactionError;
                let _ = self.transport.close().await;
                Err(Error::TransactionInvalidServerResponse(format!(
                    "unexpected completion code: {other:?}"
                )))
            }
        }
    }

    /// `cancel`: writes `CANCEL_TRANSACTION` best-effort and closes the
    /// socket.
    pub async fn cancel(mut self) -> crate::Result<()> {
        if self.core.state.is_terminal() {
            return Ok(());
        }
        let mut io = FramedIo::new(&mut self.transport, self.timeout);
        let _ = io.write_u8(TransactionResponseCode::CancelTransaction as u8).await;
        self.core.state = TransactionState::TransactionCanceled;
        let _ = self.transport.close().await;
        Ok(())
    }

    pub fn state(&self) -> TransactionState {
        self.core.state
    }
}
