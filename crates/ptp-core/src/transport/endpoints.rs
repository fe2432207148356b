//! Endpoint discovery for a PTP (Still Image class) interface.

use crate::error::{PtpError, Result};

/// USB interface class for Still Image Capture devices.
pub const STILL_IMAGE_CLASS: u8 = 0x06;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// The parts of an endpoint descriptor discovery cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDesc {
    pub address: u8,
    pub kind: TransferKind,
}

impl EndpointDesc {
    pub fn is_in(&self) -> bool {
        self.address & 0x80 != 0
    }
}

/// Endpoint addresses of an opened PTP interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointAddresses {
    pub bulk_out: u8,
    pub bulk_in: u8,
    pub interrupt_in: u8,
}

/// Pick the first bulk OUT, bulk IN and interrupt IN endpoint of an
/// alternate setting.
pub fn discover_endpoints(
    endpoints: impl IntoIterator<Item = EndpointDesc>,
) -> Result<EndpointAddresses> {
    let mut bulk_out = None;
    let mut bulk_in = None;
    let mut interrupt_in = None;

    for ep in endpoints {
        let slot = match (ep.kind, ep.is_in()) {
            (TransferKind::Bulk, false) => &mut bulk_out,
            (TransferKind::Bulk, true) => &mut bulk_in,
            (TransferKind::Interrupt, true) => &mut interrupt_in,
            _ => continue,
        };
        slot.get_or_insert(ep.address);
    }

    Ok(EndpointAddresses {
        bulk_out: bulk_out.ok_or(PtpError::InvalidEndpoints("bulk-out"))?,
        bulk_in: bulk_in.ok_or(PtpError::InvalidEndpoints("bulk-in"))?,
        interrupt_in: interrupt_in.ok_or(PtpError::InvalidEndpoints("interrupt-in"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(address: u8, kind: TransferKind) -> EndpointDesc {
        EndpointDesc { address, kind }
    }

    #[test]
    fn test_discovers_first_of_each() {
        let eps = [
            ep(0x81, TransferKind::Bulk),
            ep(0x02, TransferKind::Bulk),
            ep(0x83, TransferKind::Interrupt),
            ep(0x84, TransferKind::Bulk),
        ];
        let found = discover_endpoints(eps).unwrap();
        assert_eq!(
            found,
            EndpointAddresses {
                bulk_out: 0x02,
                bulk_in: 0x81,
                interrupt_in: 0x83
            }
        );
    }

    #[test]
    fn test_missing_interrupt_endpoint() {
        let eps = [ep(0x81, TransferKind::Bulk), ep(0x02, TransferKind::Bulk)];
        assert!(matches!(
            discover_endpoints(eps),
            Err(PtpError::InvalidEndpoints("interrupt-in"))
        ));
    }

    #[test]
    fn test_interrupt_out_is_ignored() {
        let eps = [
            ep(0x81, TransferKind::Bulk),
            ep(0x02, TransferKind::Interrupt),
            ep(0x03, TransferKind::Isochronous),
        ];
        assert!(matches!(
            discover_endpoints(eps),
            Err(PtpError::InvalidEndpoints("bulk-out"))
        ));
    }
}
