//! JSON wire shapes for the HTTP REST surface. Kept separate from
//! `RestClient` so the request/response contracts are easy to scan, the way
//! `agent-sql` keeps row structs alongside (not inside) its query functions.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SiteToSiteInfo {
    pub controller: ControllerInfo,
}

#[derive(Debug, Deserialize)]
pub struct ControllerInfo {
    #[serde(default, rename = "inputPorts")]
    pub input_ports: Vec<InputPort>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputPort {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerDto>,
}

#[derive(Debug, Deserialize)]
pub struct PeerDto {
    pub hostname: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, rename = "flowFileCount")]
    pub flow_file_count: u64,
}

#[derive(Debug, Deserialize)]
pub struct TransactionResultBody {
    #[serde(rename = "flowFilesSent")]
    pub flow_files_sent: u64,
    #[serde(rename = "responseCode")]
    pub response_code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "durationMillis")]
    pub duration_millis: Option<u64>,
}
