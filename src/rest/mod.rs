//! JSON REST client for the HTTP transport. Built the way
//! `flow-client-next::rest::Client` composes a base URL with a
//! `reqwest::Client`: the wire shapes live here as small `serde` structs,
//! and every operation is a thin, traceable wrapper over one HTTP call.

mod model;

pub use model::*;

use crate::auth::Credentials;
use crate::error::Error;
use crate::peer::Peer;
use crate::transaction::{TransactionResource, TransactionResponseCode, TransactionResult};
use std::time::Duration;
use url::Url;

/// REST client bound to one remote cluster's base URL, following the
/// `base_url` + `http_client` composition of `flow-client-next::rest::Client`.
#[derive(Clone)]
pub struct RestClient {
    base_url: Url,
    http: reqwest::Client,
    credentials: Credentials,
    timeout: Duration,
}

impl RestClient {
    pub fn new(base_url: Url, credentials: Credentials, timeout: Duration) -> crate::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")));

        if let Some(identity) = credentials.client_identity()? {
            builder = builder.identity(identity);
        }

        Ok(Self {
            base_url,
            http: builder.build()?,
            credentials,
            timeout,
        })
    }

    fn url(&self, path: &str) -> crate::Result<Url> {
        self.base_url.join(path).map_err(Error::from)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credentials.basic_auth() {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        }
    }

    async fn check_status(resp: reqwest::Response) -> crate::Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            Err(Error::from_http_status(status.as_u16()))
        }
    }

    /// `GET {base}/site-to-site`.
    pub async fn get_site_to_site_info(&self) -> crate::Result<SiteToSiteInfo> {
        tracing::debug!(url = %self.base_url, "fetching site-to-site info");
        let req = self
            .authed(self.http.get(self.url("site-to-site")?))
            .header("Accept", "application/json");

        let resp = req
            .send()
            .await
            .map_err(|_| Error::CouldNotLookupSiteToSiteInfo)?;
        let resp = Self::check_status(resp)
            .await
            .map_err(|_| Error::CouldNotLookupSiteToSiteInfo)?;
        resp.json().await.map_err(|_| Error::CouldNotLookupSiteToSiteInfo)
    }

    /// Input ports are discovered via controller info, used to resolve a
    /// configured `portName` to a `portId`.
    pub async fn get_remote_input_ports(&self) -> crate::Result<Vec<InputPort>> {
        let info = self
            .get_site_to_site_info()
            .await
            .map_err(|_| Error::CouldNotLookupInputPorts)?;
        Ok(info.controller.input_ports)
    }

    /// `GET {base}/site-to-site/peers`.
    pub async fn get_peers(&self) -> crate::Result<Vec<Peer>> {
        tracing::debug!(url = %self.base_url, "fetching peers");
        let req = self
            .authed(self.http.get(self.url("site-to-site/peers")?))
            .header("Accept", "application/json");

        let resp = req.send().await.map_err(|_| Error::CouldNotLookupPeers)?;
        let resp = Self::check_status(resp)
            .await
            .map_err(|_| Error::CouldNotLookupPeers)?;
        let body: PeersResponse = resp.json().await.map_err(|_| Error::CouldNotLookupPeers)?;

        Ok(body
            .peers
            .into_iter()
            .map(|p| Peer::new(p.hostname, p.port, p.secure, p.flow_file_count))
            .collect::<crate::Result<Vec<_>>>()?)
    }

    /// `POST {base}/data-transfer/input-ports/{portId}/transactions`.
    pub async fn initiate_send_transaction_to_port_id(
        &self,
        port_id: &str,
    ) -> crate::Result<TransactionResource> {
        let path = format!("data-transfer/input-ports/{port_id}/transactions");
        tracing::debug!(port_id, "initiating transaction");

        let req = self
            .authed(self.http.post(self.url(&path)?))
            .header("Accept", "application/json");

        let resp = req
            .send()
            .await
            .map_err(|_| Error::ClientCouldNotCreateTransaction)?;

        if resp.status().as_u16() == 409 {
            return Err(Error::CouldNotLookupInputPorts);
        }
        let resp = Self::check_status(resp)
            .await
            .map_err(|_| Error::ClientCouldNotCreateTransaction)?;

        let transaction_url = resp
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                Error::TransactionInvalidServerResponse("missing Location header".into())
            })?
            .to_string();
        let ttl_seconds: u64 = resp
            .headers()
            .get("x-server-side-transaction-ttl")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| {
                Error::TransactionInvalidServerResponse(
                    "missing x-server-side-transaction-ttl header".into(),
                )
            })?;

        let transaction_id = transaction_url
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        Ok(TransactionResource {
            transaction_id,
            transaction_url: Some(Url::parse(&transaction_url)?),
            server_side_ttl: Duration::from_secs(ttl_seconds),
            flow_files_sent: 0,
            last_response_code: Some(TransactionResponseCode::PropertiesOk),
            last_response_message: None,
        })
    }

    /// `PUT {txUrl}`, invoked strictly before `ttl/2` elapses.
    pub async fn extend_ttl_for_transaction(&self, tx_url: &Url) -> crate::Result<()> {
        tracing::debug!(url = %tx_url, "extending transaction ttl");
        let resp = self.authed(self.http.put(tx_url.clone())).send().await?;
        Self::check_status(resp).await?;
        Ok(())
    }

    /// `POST {txUrl}/flow-files`; returns the server-reported CRC32.
    pub async fn send_flow_files(&self, tx_url: &Url, body: bytes::Bytes) -> crate::Result<u32> {
        let path = format!("{}/flow-files", tx_url.as_str().trim_end_matches('/'));
        tracing::debug!(url = %path, bytes = body.len(), "sending flow files");

        let resp = self
            .authed(self.http.post(&path))
            .header("Content-Type", "application/octet-stream")
            .header("Accept", "text/plain")
            .body(body)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        let text = resp.text().await?;
        crate::util::parse_crc32_ascii(&text)
    }

    /// `DELETE {txUrl}?responseCode={N}&checksum={crc}`; commits
    /// (`CONFIRM_TRANSACTION`, CRC required) or cancels
    /// (`CANCEL_TRANSACTION`).
    pub async fn end_transaction(
        &self,
        tx_url: &Url,
        response_code: TransactionResponseCode,
        checksum: Option<u32>,
    ) -> crate::Result<TransactionResult> {
        let mut url = tx_url.clone();
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("responseCode", &(response_code as u8).to_string());
            if let Some(crc) = checksum {
                qp.append_pair("checksum", &crate::util::crc32_to_ascii(crc));
            }
        }
        tracing::debug!(url = %url, ?response_code, "ending transaction");

        let resp = self.authed(self.http.delete(url)).send().await?;
        let resp = Self::check_status(resp).await?;
        let body: TransactionResultBody = resp.json().await?;

        Ok(TransactionResult {
            response_code: TransactionResponseCode::from_i64(body.response_code),
            data_packets_transferred: body.flow_files_sent,
            message: body.message,
            duration: Duration::from_millis(body.duration_millis.unwrap_or(0)),
        })
    }
}
