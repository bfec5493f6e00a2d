//! Optional client certificate (mutual TLS) and HTTP Basic auth, carried on
//! every REST call. The TCP variant relies entirely on TLS and does not
//! consult this type.

use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_cert_pem: Option<PathBuf>,
    pub client_key_pem: Option<PathBuf>,
}

impl Credentials {
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }

    /// Builds a `reqwest::Identity` from the configured client cert/key, if
    /// any. Reading a cert bundle is the only fallible step, so this is the
    /// one place `Credentials` touches the filesystem.
    pub fn client_identity(&self) -> crate::Result<Option<reqwest::Identity>> {
        match (&self.client_cert_pem, &self.client_key_pem) {
            (Some(cert_path), Some(key_path)) => {
                let mut pem = std::fs::read(cert_path).map_err(crate::Error::Transport)?;
                let mut key = std::fs::read(key_path).map_err(crate::Error::Transport)?;
                pem.append(&mut key);
                let identity = reqwest::Identity::from_pem(&pem).map_err(crate::Error::from)?;
                Ok(Some(identity))
            }
            _ => Ok(None),
        }
    }
}

/// Typed TLS configuration for the TCP variant, translated at the
/// transport boundary into whatever the chosen TLS library expects.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub ca_bundle: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub verify_hostname: bool,
    pub alpn: Vec<String>,
}
