//! nusb-based USB transport implementation.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use nusb::descriptors::TransferType;
use nusb::transfer::{Buffer, Bulk, Completion, In, Interrupt, Out, TransferError};
use nusb::{DeviceInfo, Endpoint as NusbEndpoint, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, warn};

use super::endpoints::{EndpointDesc, STILL_IMAGE_CLASS, TransferKind, discover_endpoints};
use super::traits::{Endpoint, TransportError, UsbTransport};
use crate::error::{PtpError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);
/// Interrupt reads time out sooner so the listener notices a close promptly.
const DEFAULT_EVENT_POLL: Duration = Duration::from_millis(250);

/// nusb-based USB transport bound to one PTP interface.
pub struct NusbTransport {
    // Endpoints borrow nothing from the interface, but keep it claimed.
    _interface: Interface,
    bulk_out: Mutex<NusbEndpoint<Bulk, Out>>,
    bulk_in: Mutex<NusbEndpoint<Bulk, In>>,
    interrupt_in: Mutex<NusbEndpoint<Interrupt, In>>,
    timeout: Duration,
    event_poll: Duration,
    connected: AtomicBool,
    vid: u16,
    pid: u16,
}

/// Summary of an attached Still Image device.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub interface: u8,
}

fn ptp_interface(device_info: &DeviceInfo) -> Option<u8> {
    device_info
        .interfaces()
        .find(|i| i.class() == STILL_IMAGE_CLASS)
        .map(|i| i.interface_number())
}

/// List attached devices exposing a Still Image interface.
pub fn list_cameras() -> Result<Vec<CameraInfo>> {
    let devices = list_devices()
        .wait()
        .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

    Ok(devices
        .filter_map(|d| {
            let interface = ptp_interface(&d)?;
            Some(CameraInfo {
                vendor_id: d.vendor_id(),
                product_id: d.product_id(),
                manufacturer: d.manufacturer_string().map(str::to_string),
                product: d.product_string().map(str::to_string),
                interface,
            })
        })
        .collect())
}

impl NusbTransport {
    /// Open the first attached device with a Still Image interface.
    #[instrument(level = "info")]
    pub fn open() -> Result<Self> {
        let devices = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        for device_info in devices {
            if let Some(interface) = ptp_interface(&device_info) {
                return Self::open_device_info(device_info, interface);
            }
        }

        Err(TransportError::DeviceNotFound { vid: 0, pid: 0 }.into())
    }

    /// Open a device with specific VID/PID.
    #[instrument(level = "info", fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid)))]
    pub fn open_with_ids(vid: u16, pid: u16) -> Result<Self> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or(TransportError::DeviceNotFound { vid, pid })?;

        // Vendor-class PTP devices (some older cameras) still use interface 0.
        let interface = ptp_interface(&device_info).unwrap_or(0);
        Self::open_device_info(device_info, interface)
    }

    /// Per-transfer timeout (default 5s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Timeout of one interrupt read (default 250ms). An idle read ends as
    /// `Timeout` and the event listener re-arms it.
    pub fn with_event_poll(mut self, interval: Duration) -> Self {
        self.event_poll = interval;
        self
    }

    fn open_device_info(device_info: DeviceInfo, interface_number: u8) -> Result<Self> {
        let vid = device_info.vendor_id();
        let pid = device_info.product_id();

        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            interface = interface_number,
            "Found device"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let interface = device.claim_interface(interface_number).wait().map_err(|e| {
            TransportError::ClaimInterfaceFailed {
                interface: interface_number,
                message: e.to_string(),
            }
        })?;

        let config = device
            .active_configuration()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let alt = config
            .interface_alt_settings()
            .find(|alt| {
                alt.interface_number() == interface_number
                    && alt.alternate_setting() == interface.get_alt_setting()
            })
            .ok_or(PtpError::InvalidEndpoints("interface descriptor"))?;

        let addresses = discover_endpoints(alt.endpoints().map(|ep| EndpointDesc {
            address: ep.address(),
            kind: match ep.transfer_type() {
                TransferType::Control => TransferKind::Control,
                TransferType::Isochronous => TransferKind::Isochronous,
                TransferType::Bulk => TransferKind::Bulk,
                TransferType::Interrupt => TransferKind::Interrupt,
            },
        }))?;

        let open_err = |e: nusb::Error| TransportError::OpenFailed(e.to_string());
        let bulk_out = interface
            .endpoint::<Bulk, Out>(addresses.bulk_out)
            .map_err(open_err)?;
        let bulk_in = interface
            .endpoint::<Bulk, In>(addresses.bulk_in)
            .map_err(open_err)?;
        let interrupt_in = interface
            .endpoint::<Interrupt, In>(addresses.interrupt_in)
            .map_err(open_err)?;

        info!(
            bulk_out = %format!("0x{:02X}", addresses.bulk_out),
            bulk_in = %format!("0x{:02X}", addresses.bulk_in),
            interrupt_in = %format!("0x{:02X}", addresses.interrupt_in),
            "Device opened successfully"
        );

        Ok(Self {
            _interface: interface,
            bulk_out: Mutex::new(bulk_out),
            bulk_in: Mutex::new(bulk_in),
            interrupt_in: Mutex::new(interrupt_in),
            timeout: DEFAULT_TIMEOUT,
            event_poll: DEFAULT_EVENT_POLL,
            connected: AtomicBool::new(true),
            vid,
            pid,
        })
    }

    fn check(&self, completion: &Completion, started: Instant, timeout: Duration) -> Result<(), TransportError> {
        let result = transfer_status(&completion.status, started.elapsed(), timeout);
        if let Err(TransportError::Disconnected) = result {
            self.connected.store(false, Ordering::SeqCst);
        }
        result
    }

    fn lock_err() -> TransportError {
        TransportError::Fault("endpoint lock poisoned".into())
    }
}

fn transfer_status(
    status: &std::result::Result<(), TransferError>,
    elapsed: Duration,
    timeout: Duration,
) -> Result<(), TransportError> {
    match status {
        Ok(()) => Ok(()),
        Err(TransferError::Stall) => Err(TransportError::Stall),
        // transfer_blocking cancels the transfer once the timeout expires.
        Err(TransferError::Cancelled) if elapsed >= timeout => Err(TransportError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
        Err(TransferError::Cancelled) => Err(TransportError::Cancelled),
        Err(TransferError::Disconnected) => Err(TransportError::Disconnected),
        Err(e) => Err(TransportError::Fault(e.to_string())),
    }
}

/// IN transfers must request a multiple of the max packet size.
fn round_up_to_max_packet(len: usize, max_packet_size: usize) -> usize {
    len.max(1).div_ceil(max_packet_size) * max_packet_size
}

fn read_in<E>(ep: &mut NusbEndpoint<E, In>, max_len: usize, timeout: Duration) -> Completion
where
    E: nusb::transfer::BulkOrInterrupt,
{
    let requested = round_up_to_max_packet(max_len, ep.max_packet_size());
    let mut buf = Buffer::new(requested);
    buf.set_requested_len(requested);
    ep.transfer_blocking(buf, timeout)
}

impl UsbTransport for NusbTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn bulk_out(&self, data: &[u8]) -> Result<usize, TransportError> {
        let mut ep = self.bulk_out.lock().map_err(|_| Self::lock_err())?;
        let started = Instant::now();
        let completion = ep.transfer_blocking(Buffer::from(data.to_vec()), self.timeout);
        self.check(&completion, started, self.timeout)?;

        debug!(bytes_written = completion.actual_len, "Write complete");
        Ok(completion.actual_len)
    }

    #[instrument(skip(self))]
    fn bulk_in(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut ep = self.bulk_in.lock().map_err(|_| Self::lock_err())?;
        let started = Instant::now();
        let completion = read_in(&mut ep, max_len, self.timeout);
        self.check(&completion, started, self.timeout)?;

        let n = completion.actual_len;
        let mut buf = completion.buffer.into_vec();
        buf.truncate(n);
        debug!(bytes_read = n, "Read complete");
        Ok(buf)
    }

    fn interrupt_in(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut ep = self.interrupt_in.lock().map_err(|_| Self::lock_err())?;
        let started = Instant::now();
        let completion = read_in(&mut ep, max_len, self.event_poll);
        self.check(&completion, started, self.event_poll)?;

        let n = completion.actual_len;
        let mut buf = completion.buffer.into_vec();
        buf.truncate(n);
        Ok(buf)
    }

    fn clear_halt(&self, endpoint: Endpoint) -> Result<(), TransportError> {
        warn!(%endpoint, "Clearing halt");
        let result = match endpoint {
            Endpoint::BulkOut => self.bulk_out.lock().map_err(|_| Self::lock_err())?.clear_halt().wait(),
            Endpoint::BulkIn => self.bulk_in.lock().map_err(|_| Self::lock_err())?.clear_halt().wait(),
            Endpoint::InterruptIn => self
                .interrupt_in
                .lock()
                .map_err(|_| Self::lock_err())?
                .clear_halt()
                .wait(),
        };
        result.map_err(|e| TransportError::Fault(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}
