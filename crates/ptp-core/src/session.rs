//! PTP device session - the surface vendor layers talk to.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::cursor::PtpCursor;
use crate::engine::{DataResponse, EngineConfig, Response, TransactionEngine};
use crate::error::{PtpError, Result};
use crate::events::{Event, EventListener, EventRegistry, ListenerId};
use crate::observer::{SessionEvent, SessionObserver, TracingObserver};
use crate::profile::{VendorProfile, select_profile};
use crate::protocol::{DataType, DeviceInfo, DevicePropDesc, PropValue, operation, response};
use crate::transport::{NusbTransport, TransportError, UsbTransport};

/// Configuration for a PTP session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Total attempts while the device answers DeviceBusy.
    pub busy_retry_limit: u32,
    /// Sleep between busy attempts.
    pub busy_backoff_ms: u64,
    /// Per-call timeout, queueing included.
    pub call_timeout_ms: u64,
    /// Per USB transfer timeout.
    pub transfer_timeout_ms: u64,
    /// First bulk-in request size for data-in operations.
    pub max_receive_len: usize,
    /// Interrupt read size.
    pub event_buffer_len: usize,
    /// Timeout of one interrupt read; bounds how long close waits for the listener.
    pub event_poll_ms: u64,
    /// Issue OpenSession/CloseSession around the session.
    pub open_ptp_session: bool,
    pub session_id: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            busy_retry_limit: 10,
            busy_backoff_ms: 100,
            call_timeout_ms: 30_000,
            transfer_timeout_ms: 5_000,
            max_receive_len: 10_000,
            event_buffer_len: 512,
            event_poll_ms: 250,
            open_ptp_session: true,
            session_id: 1,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            busy_retry_limit: self.busy_retry_limit,
            busy_backoff: Duration::from_millis(self.busy_backoff_ms),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            max_receive_len: self.max_receive_len,
        }
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn event_poll(&self) -> Duration {
        Duration::from_millis(self.event_poll_ms)
    }
}

/// An open PTP device: transaction engine plus event listener over one
/// transport.
pub struct PtpSession {
    engine: TransactionEngine,
    registry: Arc<EventRegistry>,
    listener: Mutex<Option<EventListener>>,
    observer: Arc<dyn SessionObserver>,
    config: SessionConfig,
    profile: &'static VendorProfile,
    vid: u16,
    pid: u16,
    disconnected: Arc<AtomicBool>,
    ptp_session_open: AtomicBool,
    closed: AtomicBool,
}

impl PtpSession {
    /// Open the first attached Still Image device.
    pub fn open_first(config: SessionConfig) -> Result<Self> {
        let transport = NusbTransport::open()?
            .with_timeout(config.transfer_timeout())
            .with_event_poll(config.event_poll());
        Self::open(transport, config)
    }

    /// Open a device by VID/PID.
    pub fn open_with_ids(vid: u16, pid: u16, config: SessionConfig) -> Result<Self> {
        let transport = NusbTransport::open_with_ids(vid, pid)?
            .with_timeout(config.transfer_timeout())
            .with_event_poll(config.event_poll());
        Self::open(transport, config)
    }

    pub fn open<T: UsbTransport + 'static>(transport: T, config: SessionConfig) -> Result<Self> {
        Self::open_with_observer(transport, config, Arc::new(TracingObserver))
    }

    /// Start the engine and the event listener on `transport`, then open the
    /// PTP session if configured to.
    #[instrument(level = "info", skip_all, fields(vid = format!("{:04X}", transport.vendor_id()), pid = format!("{:04X}", transport.product_id())))]
    pub fn open_with_observer<T: UsbTransport + 'static>(
        transport: T,
        config: SessionConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self> {
        let vid = transport.vendor_id();
        let pid = transport.product_id();
        let transport = Arc::new(transport);

        let engine = TransactionEngine::start(
            Arc::clone(&transport),
            config.engine_config(),
            Arc::clone(&observer),
        )?;

        let registry = Arc::new(EventRegistry::new());
        let disconnected = Arc::new(AtomicBool::new(false));
        let on_fatal = {
            let disconnected = Arc::clone(&disconnected);
            let observer = Arc::clone(&observer);
            Box::new(move |err: PtpError| {
                disconnected.store(true, Ordering::SeqCst);
                observer.on_event(&SessionEvent::Disconnected {
                    reason: err.to_string(),
                });
            })
        };
        let listener = EventListener::start(
            transport,
            Arc::clone(&registry),
            config.event_buffer_len,
            on_fatal,
        )?;

        let session = Self {
            engine,
            registry,
            listener: Mutex::new(Some(listener)),
            observer,
            config,
            profile: VendorProfile::standard(),
            vid,
            pid,
            disconnected,
            ptp_session_open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };

        if session.config.open_ptp_session {
            let resp = session.engine.send_command(
                operation::OPEN_SESSION,
                &[session.config.session_id],
                &[response::OK, response::SESSION_ALREADY_OPEN],
            )?;
            if resp.code == response::SESSION_ALREADY_OPEN {
                debug!("PTP session was already open");
            }
            session.ptp_session_open.store(true, Ordering::SeqCst);
        }

        session.observer.on_event(&SessionEvent::Opened { vid, pid });
        info!(session_id = session.config.session_id, "Session open");
        Ok(session)
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PtpError::SessionClosed);
        }
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected.into());
        }
        Ok(())
    }

    /// Command/Response transaction. An empty `expected` means `[OK]`.
    pub fn send_command(&self, code: u16, params: &[u32], expected: &[u16]) -> Result<Response> {
        self.ensure_usable()?;
        self.engine.send_command(code, params, expected)
    }

    /// Command/Data-out/Response transaction.
    pub fn send_data(
        &self,
        code: u16,
        params: &[u32],
        data: Vec<u8>,
        expected: &[u16],
    ) -> Result<Response> {
        self.ensure_usable()?;
        self.engine.send_data(code, params, data, expected)
    }

    /// Command/Data-in/Response transaction.
    pub fn receive_data(
        &self,
        code: u16,
        params: &[u32],
        expected: &[u16],
        max_len: Option<usize>,
    ) -> Result<DataResponse> {
        self.ensure_usable()?;
        self.engine.receive_data(code, params, expected, max_len)
    }

    pub fn on_event_code(&self, code: u16, callback: impl Fn(&Event) + Send + Sync + 'static) -> ListenerId {
        self.registry.on_event_code(code, callback)
    }

    pub fn off_event_code(&self, code: u16, id: ListenerId) -> bool {
        self.registry.off_event_code(code, id)
    }

    /// Block until the device reports `code`. Register before triggering the
    /// operation that causes the event, or use [`on_event_code`](Self::on_event_code).
    pub fn wait_event(&self, code: u16, timeout: Duration) -> Result<Event> {
        self.ensure_usable()?;
        self.registry.wait_event(code, timeout)
    }

    pub fn get_device_info(&self) -> Result<DeviceInfo> {
        let resp = self.receive_data(operation::GET_DEVICE_INFO, &[], &[], None)?;
        DeviceInfo::from_bytes(&resp.data)
    }

    pub fn get_device_prop_desc(&self, prop_code: u16) -> Result<DevicePropDesc> {
        let resp = self.receive_data(operation::GET_DEVICE_PROP_DESC, &[prop_code as u32], &[], None)?;
        DevicePropDesc::from_bytes(&resp.data)
    }

    pub fn get_device_prop_value(&self, prop_code: u16, data_type: DataType) -> Result<PropValue> {
        let resp = self.receive_data(operation::GET_DEVICE_PROP_VALUE, &[prop_code as u32], &[], None)?;
        PropValue::read(&mut PtpCursor::from_bytes(resp.data), data_type)
    }

    pub fn set_device_prop_value(&self, prop_code: u16, value: &PropValue) -> Result<()> {
        self.send_data(
            operation::SET_DEVICE_PROP_VALUE,
            &[prop_code as u32],
            value.to_bytes(),
            &[],
        )?;
        Ok(())
    }

    pub fn get_storage_ids(&self) -> Result<Vec<u32>> {
        let resp = self.receive_data(operation::GET_STORAGE_IDS, &[], &[], None)?;
        PtpCursor::from_bytes(resp.data).read_array_of(|c| c.read_u32())
    }

    /// Trigger a capture. Zero for either argument lets the device choose.
    /// Completion is reported through CaptureComplete/ObjectAdded events.
    pub fn initiate_capture(&self, storage_id: u32, object_format: u16) -> Result<Response> {
        self.send_command(
            operation::INITIATE_CAPTURE,
            &[storage_id, object_format as u32],
            &[],
        )
    }

    pub fn profile(&self) -> &'static VendorProfile {
        self.profile
    }

    pub fn set_profile(&mut self, profile: &'static VendorProfile) {
        self.profile = profile;
    }

    /// Pick the profile matching this device's DeviceInfo.
    pub fn detect_profile(&mut self, candidates: &[&'static VendorProfile]) -> Result<&'static VendorProfile> {
        let info = self.get_device_info()?;
        self.profile = select_profile(candidates, &info);
        info!(profile = self.profile.name, model = %info.model, "Selected property profile");
        Ok(self.profile)
    }

    /// Read a named property through the active profile.
    pub fn get_property(&self, name: &str) -> Result<String> {
        let spec = self.profile.lookup(name)?;
        let value = self.get_device_prop_value(spec.prop_code, spec.data_type)?;
        Ok(spec.render(&value))
    }

    /// Write a named property through the active profile.
    pub fn set_property(&self, name: &str, value: &str) -> Result<()> {
        let spec = self.profile.lookup(name)?;
        let value = spec.parse(value)?;
        self.set_device_prop_value(spec.prop_code, &value)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn vendor_id(&self) -> u16 {
        self.vid
    }

    pub fn product_id(&self) -> u16 {
        self.pid
    }

    /// Set once the event listener stopped on a transport failure.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Close the PTP session (best effort), fail queued calls and stop the
    /// event listener.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.ptp_session_open.swap(false, Ordering::SeqCst) && !self.is_disconnected() {
            if let Err(e) = self.engine.send_command(operation::CLOSE_SESSION, &[], &[]) {
                warn!(error = %e, "CloseSession failed");
            }
        }
        self.engine.close();
        let listener = self.listener.lock().ok().and_then(|mut l| l.take());
        if let Some(mut listener) = listener {
            listener.stop();
        }
        self.observer.on_event(&SessionEvent::Closed);
    }
}

impl Drop for PtpSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Container, ContainerType, device_prop, event};
    use crate::transport::MockTransport;
    use std::thread;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<SessionEvent>>,
    }

    impl SessionObserver for RecordingObserver {
        fn on_event(&self, event: &SessionEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn sample_info() -> DeviceInfo {
        DeviceInfo {
            standard_version: 100,
            manufacturer: "Acme".into(),
            model: "Shooter 9".into(),
            operations_supported: vec![0x1001, 0x1002, 0x1003, 0x100E],
            ..Default::default()
        }
    }

    /// A camera answering the standard operations.
    fn camera() -> Arc<MockTransport> {
        let mock = Arc::new(MockTransport::new());
        let info = sample_info().to_bytes();
        mock.set_responder(move |cmd| {
            let tid = cmd.transaction_id;
            let data = match cmd.code {
                operation::GET_DEVICE_INFO => Some(info.clone()),
                operation::GET_DEVICE_PROP_VALUE => Some(PropValue::U16(280).to_bytes()),
                operation::GET_STORAGE_IDS => {
                    let mut c = PtpCursor::new();
                    c.write_array_of(&[0x0001_0001u32, 0x0002_0001], |c, v| c.write_u32(*v));
                    Some(c.finalize())
                }
                _ => None,
            };
            let mut replies = Vec::new();
            if let Some(data) = data {
                replies.push(Container::data(cmd.code, tid, data).encode());
            }
            replies.push(Container::response(response::OK, tid, &[]).encode());
            replies
        });
        mock
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            busy_backoff_ms: 1,
            call_timeout_ms: 5_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_config_defaults_and_partial_toml() {
        let config: SessionConfig = toml::from_str("busy_retry_limit = 3\nsession_id = 7\n").unwrap();
        assert_eq!(config.busy_retry_limit, 3);
        assert_eq!(config.session_id, 7);
        assert_eq!(config.max_receive_len, 10_000);
        assert!(config.open_ptp_session);

        let engine = config.engine_config();
        assert_eq!(engine.busy_backoff, Duration::from_millis(100));
        assert_eq!(engine.call_timeout, Duration::from_secs(30));
        assert!(config.event_poll() < config.transfer_timeout());
    }

    #[test]
    fn test_open_and_close_ptp_session() {
        let mock = camera();
        let observer = Arc::new(RecordingObserver::default());
        let session = PtpSession::open_with_observer(Arc::clone(&mock), test_config(), observer.clone()).unwrap();

        let sent = mock.written_containers();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].code, operation::OPEN_SESSION);
        assert_eq!(sent[0].params().unwrap(), vec![1]);

        session.close();
        let codes: Vec<u16> = mock.written_containers().iter().map(|c| c.code).collect();
        assert_eq!(codes, vec![operation::OPEN_SESSION, operation::CLOSE_SESSION]);

        assert!(matches!(
            session.send_command(operation::GET_DEVICE_INFO, &[], &[]),
            Err(PtpError::SessionClosed)
        ));

        let events = observer.events.lock().unwrap();
        assert!(matches!(events.first(), Some(SessionEvent::Packet { .. })));
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Opened { vid: 0x04A9, .. })));
        assert!(matches!(events.last(), Some(SessionEvent::Closed)));
    }

    #[test]
    fn test_open_accepts_session_already_open() {
        let mock = Arc::new(MockTransport::new());
        mock.set_responder(|cmd| {
            vec![Container::response(response::SESSION_ALREADY_OPEN, cmd.transaction_id, &[]).encode()]
        });
        assert!(PtpSession::open(Arc::clone(&mock), test_config()).is_ok());
    }

    #[test]
    fn test_open_fails_on_rejected_open_session() {
        let mock = Arc::new(MockTransport::new());
        mock.set_responder(|cmd| {
            vec![Container::response(response::GENERAL_ERROR, cmd.transaction_id, &[]).encode()]
        });
        let err = PtpSession::open(Arc::clone(&mock), test_config()).err().unwrap();
        assert!(matches!(err, PtpError::UnexpectedResponseCode { .. }));
        // No CloseSession for a session that never opened.
        assert_eq!(mock.get_writes().len(), 1);
    }

    #[test]
    fn test_open_without_ptp_session() {
        let mock = camera();
        let config = SessionConfig {
            open_ptp_session: false,
            ..test_config()
        };
        let session = PtpSession::open(Arc::clone(&mock), config).unwrap();
        session.close();
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_dataset_operations() {
        let mock = camera();
        let session = PtpSession::open(Arc::clone(&mock), test_config()).unwrap();

        let info = session.get_device_info().unwrap();
        assert_eq!(info, sample_info());
        assert!(info.supports_operation(operation::INITIATE_CAPTURE));

        assert_eq!(session.get_storage_ids().unwrap(), vec![0x0001_0001, 0x0002_0001]);
        assert_eq!(
            session
                .get_device_prop_value(device_prop::F_NUMBER, DataType::UInt16)
                .unwrap(),
            PropValue::U16(280)
        );

        let resp = session.initiate_capture(0, 0).unwrap();
        assert_eq!(resp.code, response::OK);
        let capture = mock.written_containers().pop().unwrap();
        assert_eq!(capture.code, operation::INITIATE_CAPTURE);
        assert_eq!(capture.params().unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_named_properties() {
        let mock = camera();
        let session = PtpSession::open(Arc::clone(&mock), test_config()).unwrap();

        assert_eq!(session.get_property("fNumber").unwrap(), "f/2.8");
        session.set_property("fNumber", "f/5.6").unwrap();

        let sent = mock.written_containers();
        let data = sent.last().unwrap();
        assert_eq!(data.kind, ContainerType::Data);
        assert_eq!(data.code, operation::SET_DEVICE_PROP_VALUE);
        assert_eq!(data.payload, vec![0x30, 0x02]);
        let command = &sent[sent.len() - 2];
        assert_eq!(command.params().unwrap(), vec![device_prop::F_NUMBER as u32]);

        assert!(matches!(
            session.get_property("zoom"),
            Err(PtpError::UnknownProperty(_))
        ));
    }

    #[test]
    fn test_detect_profile_defaults_to_standard() {
        let mock = camera();
        let mut session = PtpSession::open(Arc::clone(&mock), test_config()).unwrap();
        assert_eq!(session.detect_profile(&[]).unwrap().name, "standard");
    }

    #[test]
    fn test_wait_event() {
        let mock = camera();
        let session = PtpSession::open(Arc::clone(&mock), test_config()).unwrap();

        let feeder = {
            let mock = Arc::clone(&mock);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                mock.queue_event(&Container::event(event::OBJECT_ADDED, 0, &[0x42]));
            })
        };
        let ev = session.wait_event(event::OBJECT_ADDED, Duration::from_secs(2)).unwrap();
        assert_eq!(ev.params, vec![0x42]);
        feeder.join().unwrap();
    }

    #[test]
    fn test_listener_failure_marks_disconnected() {
        let mock = camera();
        let observer = Arc::new(RecordingObserver::default());
        let session = PtpSession::open_with_observer(Arc::clone(&mock), test_config(), observer.clone()).unwrap();

        mock.queue_interrupt_error(TransportError::Fault("babble".into()));
        let deadline = Instant::now() + Duration::from_secs(2);
        while !session.is_disconnected() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(session.is_disconnected());
        assert!(matches!(
            session.get_device_info(),
            Err(PtpError::Transport(TransportError::Disconnected))
        ));
        assert!(
            observer
                .events
                .lock()
                .unwrap()
                .iter()
                .any(|e| matches!(e, SessionEvent::Disconnected { .. }))
        );

        // No CloseSession on a dead device.
        session.close();
        let codes: Vec<u16> = mock.written_containers().iter().map(|c| c.code).collect();
        assert_eq!(codes, vec![operation::OPEN_SESSION]);
    }
}
