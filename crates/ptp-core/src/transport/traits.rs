//! USB Transport layer abstraction.
//!
//! Defines the `UsbTransport` trait for the three PTP pipes,
//! allowing different implementations (nusb, mock, etc.).

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint stalled")]
    Stall,

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("Transfer fault: {0}")]
    Fault(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The three pipes a PTP interface exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    BulkOut,
    BulkIn,
    InterruptIn,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::BulkOut => write!(f, "bulk-out"),
            Endpoint::BulkIn => write!(f, "bulk-in"),
            Endpoint::InterruptIn => write!(f, "interrupt-in"),
        }
    }
}

/// Abstract USB transport interface.
///
/// The transaction engine only touches the bulk pipes and the event
/// listener only touches the interrupt pipe, so implementations must allow
/// both to be used from different threads at once.
pub trait UsbTransport: Send + Sync {
    /// Write one transfer to the bulk OUT endpoint.
    fn bulk_out(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read one transfer (up to `max_len` bytes) from the bulk IN endpoint.
    fn bulk_in(&self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Read one transfer from the interrupt IN endpoint.
    ///
    /// Returns `TransportError::Timeout` when no event arrived in time.
    fn interrupt_in(&self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Clear a halt condition after a stall.
    fn clear_halt(&self, endpoint: Endpoint) -> Result<(), TransportError>;

    /// Check if device is still connected.
    fn is_connected(&self) -> bool;

    /// Get the current VID.
    fn vendor_id(&self) -> u16;

    /// Get the current PID.
    fn product_id(&self) -> u16;
}

impl<T: UsbTransport + ?Sized> UsbTransport for std::sync::Arc<T> {
    fn bulk_out(&self, data: &[u8]) -> Result<usize, TransportError> {
        (**self).bulk_out(data)
    }

    fn bulk_in(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        (**self).bulk_in(max_len)
    }

    fn interrupt_in(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        (**self).interrupt_in(max_len)
    }

    fn clear_halt(&self, endpoint: Endpoint) -> Result<(), TransportError> {
        (**self).clear_halt(endpoint)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn vendor_id(&self) -> u16 {
        (**self).vendor_id()
    }

    fn product_id(&self) -> u16 {
        (**self).product_id()
    }
}
