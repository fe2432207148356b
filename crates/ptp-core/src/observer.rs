//! Session observer for UI decoupling.
//!
//! Allows CLI/GUI layers to follow what a session does on the wire without
//! tight coupling to the engine.

use std::fmt;

use crate::protocol::{ContainerType, describe};

/// USB packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Transmit (Host -> Device)
    Rx, // Receive (Device -> Host)
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Events emitted by a PTP session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// USB interface claimed and engine running.
    Opened { vid: u16, pid: u16 },
    /// Container sent or received on the bulk pipe.
    Packet {
        direction: PacketDirection,
        kind: ContainerType,
        code: u16,
        transaction_id: u32,
        length: usize,
    },
    /// Device answered DeviceBusy; the transaction will be reissued.
    BusyRetry { code: u16, attempt: u32 },
    /// Event listener stopped on a fatal error.
    Disconnected { reason: String },
    /// Session closed by the host.
    Closed,
}

/// Observer trait for receiving session events.
///
/// Implement this trait in your UI layer to receive updates. Called from
/// the engine worker and the event listener threads.
pub trait SessionObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &SessionEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_event(&self, _event: &SessionEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Opened { vid, pid } => {
                tracing::info!(vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), "Session opened");
            }
            SessionEvent::Packet {
                direction,
                kind,
                code,
                transaction_id,
                length,
            } => {
                tracing::trace!(
                    dir = %direction,
                    kind = %kind,
                    code = %describe(*code),
                    tid = transaction_id,
                    len = length,
                    "USB Packet"
                );
            }
            SessionEvent::BusyRetry { code, attempt } => {
                tracing::debug!(code = %describe(*code), attempt, "Device busy, retrying");
            }
            SessionEvent::Disconnected { reason } => {
                tracing::warn!(reason = %reason, "Device disconnected");
            }
            SessionEvent::Closed => {
                tracing::info!("Session closed");
            }
        }
    }
}
