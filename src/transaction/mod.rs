//! The transaction state machine shared by the HTTP and TCP variants, and
//! the wire-level types both protocols agree on.

pub mod http;
pub mod tcp;

use crate::encoder::Encoder;
use crate::peer::Peer;
use std::time::{Duration, Instant};

/// Forward-progress and terminal states of one send transaction.
/// Once a transaction reaches a terminal state it is immutable; further
/// operations must fail with [`crate::Error::TransactionTerminated`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    TransactionStarted,
    DataExchanged,
    TransactionConfirmed,
    TransactionCompleted,
    TransactionCanceled,
    TransactionError,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionState::TransactionCompleted
                | TransactionState::TransactionCanceled
                | TransactionState::TransactionError
        )
    }
}

/// One-byte wire response codes. Unrecognized byte values decode
/// to `UnrecognizedResponseCode`, never an error on their own — it's up to
/// the caller to decide whether an unrecognized code is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionResponseCode {
    Reserved = 0,
    PropertiesOk = 1,
    ContinueTransaction = 10,
    FinishTransaction = 11,
    ConfirmTransaction = 12,
    TransactionFinished = 13,
    TransactionFinishedButDestinationFull = 14,
    CancelTransaction = 15,
    BadChecksum = 19,
    MoreData = 20,
    NoMoreData = 21,
    UnknownPort = 200,
    PortNotInValidState = 201,
    PortsDestinationFull = 202,
    UnknownPropertyName = 230,
    IllegalPropertyValue = 231,
    MissingProperty = 232,
    Unauthorized = 240,
    Abort = 250,
    UnrecognizedResponseCode = 254,
    EndOfStream = 255,
}

impl TransactionResponseCode {
    pub fn from_byte(b: u8) -> TransactionResponseCode {
        use TransactionResponseCode::*;
        match b {
            0 => Reserved,
            1 => PropertiesOk,
            10 => ContinueTransaction,
            11 => FinishTransaction,
            12 => ConfirmTransaction,
            13 => TransactionFinished,
            14 => TransactionFinishedButDestinationFull,
            15 => CancelTransaction,
            19 => BadChecksum,
            20 => MoreData,
            21 => NoMoreData,
            200 => UnknownPort,
            201 => PortNotInValidState,
            202 => PortsDestinationFull,
            230 => UnknownPropertyName,
            231 => IllegalPropertyValue,
            232 => MissingProperty,
            240 => Unauthorized,
            250 => Abort,
            255 => EndOfStream,
            _ => UnrecognizedResponseCode,
        }
    }

    pub fn from_i64(v: i64) -> TransactionResponseCode {
        if (0..=255).contains(&v) {
            TransactionResponseCode::from_byte(v as u8)
        } else {
            TransactionResponseCode::UnrecognizedResponseCode
        }
    }
}

/// Mutable HTTP-variant transaction handle. Fields are only mutated by
/// the engine while the enclosing transaction is non-terminal.
#[derive(Debug, Clone)]
pub struct TransactionResource {
    pub transaction_id: String,
    pub transaction_url: Option<url::Url>,
    pub server_side_ttl: Duration,
    pub flow_files_sent: u64,
    pub last_response_code: Option<TransactionResponseCode>,
    pub last_response_message: Option<String>,
}

/// Outcome of `endTransaction`, immutable once constructed.
#[derive(Debug, Clone)]
pub struct TransactionResult {
    pub response_code: TransactionResponseCode,
    pub data_packets_transferred: u64,
    pub message: Option<String>,
    pub duration: Duration,
}

impl TransactionResult {
    /// True iff the server reports its destination port is full; callers
    /// are expected to sleep before the next `process()`.
    pub fn should_backoff(&self) -> bool {
        self.response_code == TransactionResponseCode::TransactionFinishedButDestinationFull
    }
}

/// The pieces every transaction variant composes instead of inheriting from
/// a common base class: state, the in-flight encoder, and the peer the
/// transaction was opened against.
pub struct TransactionCore {
    pub state: TransactionState,
    pub encoder: Encoder,
    pub peer: Peer,
    pub started_at: Instant,
}

impl TransactionCore {
    pub fn new(peer: Peer) -> Self {
        Self {
            state: TransactionState::TransactionStarted,
            encoder: Encoder::new(),
            peer,
            started_at: Instant::now(),
        }
    }

    pub fn ensure_not_terminal(&self) -> crate::Result<()> {
        if self.state.is_terminal() {
            Err(crate::Error::TransactionTerminated)
        } else {
            Ok(())
        }
    }
}
