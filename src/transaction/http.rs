//! HTTP-framed transaction engine. Drives the state machine in
//! [`super::TransactionState`] over [`crate::rest::RestClient`], including
//! the TTL keepalive task.

use super::{TransactionCore, TransactionResponseCode, TransactionResult, TransactionState};
use crate::error::{ConfirmError, Error};
use crate::packet::DataPacket;
use crate::peer::Peer;
use crate::rest::RestClient;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub struct HttpTransaction {
    core: TransactionCore,
    rest: RestClient,
    transaction_url: url::Url,
    server_side_ttl: Duration,
    keepalive_stop: Option<mpsc::Sender<()>>,
    /// Set by the spawned keepalive task on an `extendTTLForTransaction`
    /// failure, since that task holds no handle to `core.state` directly.
    /// Checked (and drained) by `send_data`/`confirm_and_complete` so a
    /// keepalive failure forces the documented `TRANSACTION_ERROR`
    /// transition instead of being silently swallowed.
    keepalive_failure: Arc<Mutex<Option<String>>>,
}

impl HttpTransaction {
    /// `create`: `initiateSendTransactionToPortId`, then start the TTL
    /// keepalive timer at `ttl / 2`.
    pub async fn create(rest: RestClient, peer: Peer, port_id: &str) -> crate::Result<Self> {
        let resource = rest
            .initiate_send_transaction_to_port_id(port_id)
            .await
            .map_err(|_| Error::ClientCouldNotCreateTransaction)?;
        let transaction_url = resource
            .transaction_url
            .clone()
            .ok_or(Error::ClientCouldNotCreateTransaction)?;

        let mut txn = HttpTransaction {
            core: TransactionCore::new(peer),
            rest,
            transaction_url,
            server_side_ttl: resource.server_side_ttl,
            keepalive_stop: None,
            keepalive_failure: Arc::new(Mutex::new(None)),
        };
        txn.start_keepalive();
        Ok(txn)
    }

    fn start_keepalive(&mut self) {
        let (tx, mut rx) = mpsc::channel(1);
        self.keepalive_stop = Some(tx);

        let rest = self.rest.clone();
        let url = self.transaction_url.clone();
        let interval = self.server_side_ttl / 2;
        let failure = self.keepalive_failure.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if let Err(err) = rest.extend_ttl_for_transaction(&url).await {
                            tracing::warn!(?err, %url, "ttl keepalive failed");
                            *failure.lock().unwrap() = Some(err.to_string());
                            return;
                        }
                    }
                    _ = rx.recv() => return,
                }
            }
        });
    }

    fn stop_keepalive(&mut self) {
        self.keepalive_stop.take();
    }

    /// Drains a keepalive failure recorded by the spawned task, if any,
    /// forcing the `TRANSACTION_ERROR` transition §4.4 requires.
    fn check_keepalive(&mut self) -> crate::Result<()> {
        let failure = self.keepalive_failure.lock().unwrap().take();
        if let Some(message) = failure {
            self.core.state = TransactionState::TransactionError;
            self.stop_keepalive();
            return Err(Error::TransactionInvalidServerResponse(format!(
                "ttl keepalive failed: {message}"
            )));
        }
        Ok(())
    }

    /// `sendData`: append to the encoder; no network I/O until confirmation.
    pub async fn send_data(&mut self, packet: DataPacket) -> crate::Result<()> {
        self.core.ensure_not_terminal()?;
        self.check_keepalive()?;
        self.core
            .encoder
            .append_data_packet(packet)
            .await
            .map_err(Error::Transport)?;
        self.core.state = TransactionState::DataExchanged;
        Ok(())
    }

    /// `confirmAndComplete`: `sendFlowFiles`, compare CRCs, then commit or
    /// cancel on mismatch.
    pub async fn confirm_and_complete(mut self) -> crate::Result<TransactionResult> {
        self.core.ensure_not_terminal()?;
        self.check_keepalive()?;

        let local_crc = self.core.encoder.crc32();
        let body = bytes::Bytes::copy_from_slice(self.core.encoder.as_bytes());

        let server_crc = match self.rest.send_flow_files(&self.transaction_url, body).await {
            Ok(crc) => crc,
            Err(err) => {
                self.core.state = TransactionState::TransactionError;
                self.stop_keepalive();
                let _ = self
                    .rest
                    .end_transaction(&self.transaction_url, TransactionResponseCode::CancelTransaction, None)
                    .await;
                return Err(err);
            }
        };

        self.check_keepalive()?;

        if server_crc != local_crc {
            let mismatch = ConfirmError::ChecksumMismatch {
                local: local_crc,
                server: server_crc,
                response_code: TransactionResponseCode::CancelTransaction,
            };
            tracing::warn!(local_crc, server_crc, %mismatch, "checksum mismatch, canceling transaction");
            self.core.state = TransactionState::TransactionError;
            self.stop_keepalive();
            let _ = self
                .rest
                .end_transaction(&self.transaction_url, TransactionResponseCode::CancelTransaction, None)
                .await;
            return Err(mismatch.into());
        }

        self.core.state = TransactionState::TransactionConfirmed;

        let result = self
            .rest
            .end_transaction(
                &self.transaction_url,
                TransactionResponseCode::ConfirmTransaction,
                Some(local_crc),
            )
            .await;
        self.stop_keepalive();

        match result {
            Ok(result) => {
                self.core.state = TransactionState::TransactionCompleted;
                Ok(result)
            }
            Err(err) => {
                self.core.state = TransactionState::TransactionError;
                Err(err)
            }
        }
    }

    /// `cancel`: best-effort `endTransaction(CANCEL)` from any non-terminal
    /// state.
    pub async fn cancel(mut self) -> crate::Result<()> {
        if self.core.state.is_terminal() {
            return Ok(());
        }
        self.stop_keepalive();
        let result = self
            .rest
            .end_transaction(&self.transaction_url, TransactionResponseCode::CancelTransaction, None)
            .await;
        self.core.state = TransactionState::TransactionCanceled;
        result.map(|_| ())
    }

    pub fn state(&self) -> TransactionState {
        self.core.state
    }
}
