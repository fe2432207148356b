//! Error taxonomy for the PTP engine, cursor and session.

use thiserror::Error;

use crate::transport::{Endpoint, TransportError};

#[derive(Error, Debug)]
pub enum PtpError {
    #[error("Read of {requested} bytes at offset {offset} exceeds buffer length {len}")]
    OutOfRange {
        offset: usize,
        requested: usize,
        len: usize,
    },

    #[error("{endpoint} transfer failed: {source}")]
    TransferFailed {
        endpoint: Endpoint,
        #[source]
        source: TransportError,
    },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Transaction ID mismatch: sent {sent}, received {received}")]
    TransactionIdMismatch { sent: u32, received: u32 },

    #[error("Unexpected response code 0x{actual:04X} (expected one of {expected:04X?})")]
    UnexpectedResponseCode { expected: Vec<u16>, actual: u16 },

    #[error("Device still busy after {attempts} attempts of operation 0x{code:04X}")]
    ExhaustedRetries { code: u16, attempts: u32 },

    #[error("Missing {0} endpoint")]
    InvalidEndpoints(&'static str),

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Session is closed")]
    SessionClosed,

    #[error("Too many command parameters: {count} (max {max})")]
    TooManyParameters { count: usize, max: usize },

    #[error("Invalid PTP date/time string {0:?}")]
    InvalidDateTime(String),

    #[error("Unsupported data type code 0x{0:04X}")]
    UnsupportedDataType(u16),

    #[error("Unknown property {0:?}")]
    UnknownProperty(String),

    #[error("Invalid value {value:?} for property {property}")]
    InvalidPropertyValue { property: &'static str, value: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PtpError {
    /// Wrap a transport failure on a specific endpoint.
    pub fn transfer(endpoint: Endpoint, source: TransportError) -> Self {
        Self::TransferFailed { endpoint, source }
    }

    /// Whether the failure means the bulk pipe can no longer be trusted.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            PtpError::TransactionIdMismatch { .. } | PtpError::ProtocolViolation(_)
        )
    }
}

pub type Result<T, E = PtpError> = std::result::Result<T, E>;
