//! Transport layer module.

pub mod endpoints;
pub mod mock;
pub mod nusb;
pub mod traits;

pub use endpoints::{EndpointAddresses, EndpointDesc, TransferKind, discover_endpoints};
pub use mock::MockTransport;
pub use self::nusb::{CameraInfo, NusbTransport, list_cameras};
pub use traits::{Endpoint, TransportError, UsbTransport};
