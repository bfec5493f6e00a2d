use crate::transaction::TransactionResponseCode;

/// The HTTP status codes returned by the remote cluster are folded into
/// `Error::HttpStatus` by adding this base, matching the
/// `NiFiErrorHttpStatusCode` convention used elsewhere in the S2S ecosystem.
pub const HTTP_STATUS_CODE_BASE: u32 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("request timed out")]
    Timeout,

    #[error("server returned HTTP status {0}")]
    HttpStatus(u32),

    #[error("could not create transaction")]
    ClientCouldNotCreateTransaction,

    #[error("could not look up site-to-site info")]
    CouldNotLookupSiteToSiteInfo,

    #[error("could not look up input ports")]
    CouldNotLookupInputPorts,

    #[error("could not look up peers")]
    CouldNotLookupPeers,

    #[error("invalid server response: {0}")]
    TransactionInvalidServerResponse(String),

    #[error("failed to read queued packet state")]
    DatabaseRead(#[source] sqlx::Error),

    #[error("failed to write queued packet state")]
    DatabaseWrite(#[source] sqlx::Error),

    #[error("queue storage transaction failed")]
    DatabaseTransaction(#[source] sqlx::Error),

    #[error("could not form request URL: {0}")]
    RestApiClientCouldNotFormURL(String),

    #[error("the send queue is full")]
    QueueFull,

    #[error("transaction is in a terminal state and cannot be used")]
    TransactionTerminated,

    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Maps a 2xx/3xx/4xx/5xx HTTP status to an `Error`. 2xx is success and
    /// must never reach this function; everything else is a failure keyed
    /// off `NiFiErrorHttpStatusCode + status`.
    pub fn from_http_status(status: u16) -> Error {
        Error::HttpStatus(HTTP_STATUS_CODE_BASE + status as u32)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Error {
        Error::RestApiClientCouldNotFormURL(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Error {
        Error::Timeout
    }
}

/// Result produced by `endTransaction` / `confirmAndComplete`, distinguishing
/// a CRC mismatch (always a terminal, canceled transaction) from a plain I/O
/// failure so callers can tell the two apart without matching on strings.
#[derive(Debug, thiserror::Error)]
pub enum ConfirmError {
    #[error("checksum mismatch: local {local} != server {server}")]
    ChecksumMismatch {
        local: u32,
        server: u32,
        response_code: TransactionResponseCode,
    },

    #[error(transparent)]
    Other(#[from] Error),
}

impl From<ConfirmError> for Error {
    fn from(err: ConfirmError) -> Error {
        match err {
            ConfirmError::ChecksumMismatch { local, server, .. } => {
                Error::TransactionInvalidServerResponse(format!(
                    "checksum mismatch: local {local} != server {server}"
                ))
            }
            ConfirmError::Other(err) => err,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
