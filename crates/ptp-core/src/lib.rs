//! PTP-Core: host-side Picture Transfer Protocol over USB.
//!
//! This crate frames PTP operations into USB bulk containers, correlates
//! the Command/Data/Response phases of each transaction, serializes
//! concurrent callers onto the single bulk pipe, retries while the camera
//! reports DeviceBusy, and dispatches events from the interrupt pipe.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Cursor**: little-endian reader/writer for PTP datasets
//! - **Protocol**: datacode tables, containers, datasets
//! - **Transport**: USB pipe abstraction (nusb, mock)
//! - **Engine**: one-at-a-time transaction worker
//! - **Events**: interrupt listener and event registry
//! - **Observer**: hooks for UI layers
//! - **Session**: device facade used by vendor layers
//! - **Profile**: named properties per camera family
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use ptp_core::protocol::event;
//! use ptp_core::session::{PtpSession, SessionConfig};
//!
//! let session = PtpSession::open_first(SessionConfig::default())?;
//! println!("{}", session.get_device_info()?.model);
//!
//! session.initiate_capture(0, 0)?;
//! let added = session.wait_event(event::OBJECT_ADDED, Duration::from_secs(10))?;
//! println!("new object handle 0x{:08X}", added.params[0]);
//! # Ok::<(), ptp_core::PtpError>(())
//! ```

pub mod cursor;
pub mod engine;
pub mod error;
pub mod events;
pub mod observer;
pub mod profile;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use cursor::PtpCursor;
pub use engine::{DataResponse, EngineConfig, Response, TransactionEngine};
pub use error::{PtpError, Result};
pub use events::{Event, EventRegistry, ListenerId};
pub use observer::{NullObserver, SessionEvent, SessionObserver, TracingObserver};
pub use profile::{PropertySpec, VendorProfile};
pub use protocol::{Container, ContainerType, DataType, DeviceInfo, DevicePropDesc, PropValue};
pub use session::{PtpSession, SessionConfig};
pub use transport::{MockTransport, NusbTransport, TransportError, UsbTransport};
