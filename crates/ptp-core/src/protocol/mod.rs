//! Protocol module - PTP wire definitions.

pub mod codes;
pub mod container;
pub mod datasets;

pub use codes::{describe, device_prop, event, object_format, operation, response};
pub use container::{Container, ContainerType, HEADER_LEN, MAX_PARAMS};
pub use datasets::{DataType, DeviceInfo, DevicePropDesc, PropForm, PropValue, ScalarType};
