//! Asynchronous PTP events.
//!
//! [`EventListener`] keeps one read armed on the interrupt-in endpoint and
//! hands every decoded event to the [`EventRegistry`], which invokes the
//! callbacks registered for its code. The listener never touches the bulk
//! endpoints, so a slow transaction cannot hold up event delivery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::error::{PtpError, Result};
use crate::protocol::{Container, ContainerType, event};
use crate::transport::{Endpoint, TransportError, UsbTransport};

/// Event delivered on the interrupt pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub code: u16,
    pub transaction_id: u32,
    pub params: Vec<u32>,
}

impl Event {
    pub fn from_container(container: &Container) -> Result<Self> {
        if container.kind != ContainerType::Event {
            return Err(PtpError::ProtocolViolation(format!(
                "{} container on the interrupt pipe",
                container.kind
            )));
        }
        Ok(Self {
            code: container.code,
            transaction_id: container.transaction_id,
            params: container.params()?,
        })
    }

    pub fn name(&self) -> String {
        event::name(self.code)
            .map(str::to_string)
            .unwrap_or_else(|| format!("0x{:04X}", self.code))
    }
}

/// Handle returned by [`EventRegistry::on_event_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Callbacks keyed by event code.
#[derive(Default)]
pub struct EventRegistry {
    listeners: Mutex<HashMap<u16, Vec<(ListenerId, EventCallback)>>>,
    next_id: AtomicU64,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event_code(&self, code: u16, callback: impl Fn(&Event) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.entry(code).or_default().push((id, Arc::new(callback)));
        }
        id
    }

    /// Returns false if `id` was not registered for `code`.
    pub fn off_event_code(&self, code: u16, id: ListenerId) -> bool {
        let Ok(mut listeners) = self.listeners.lock() else {
            return false;
        };
        let Some(list) = listeners.get_mut(&code) else {
            return false;
        };
        let before = list.len();
        list.retain(|(other, _)| *other != id);
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.remove(&code);
        }
        removed
    }

    pub fn listener_count(&self, code: u16) -> usize {
        self.listeners
            .lock()
            .map(|l| l.get(&code).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Invoke every callback registered for the event's code. Returns the
    /// number of callbacks run; events nobody listens for are dropped.
    pub fn dispatch(&self, event: &Event) -> usize {
        // Callbacks may (un)register listeners, so run them unlocked.
        let callbacks: Vec<EventCallback> = match self.listeners.lock() {
            Ok(listeners) => listeners
                .get(&event.code)
                .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default(),
            Err(_) => return 0,
        };
        for cb in &callbacks {
            cb(event);
        }
        callbacks.len()
    }

    /// Block until an event with `code` arrives or `timeout` expires.
    pub fn wait_event(&self, code: u16, timeout: Duration) -> Result<Event> {
        let (tx, rx) = mpsc::sync_channel(1);
        let id = self.on_event_code(code, move |event| {
            let _ = tx.try_send(event.clone());
        });
        let result = rx.recv_timeout(timeout);
        self.off_event_code(code, id);
        result.map_err(|_| PtpError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        })
    }
}

/// Called once when the listener stops on a fatal error.
pub type FatalHandler = Box<dyn FnOnce(PtpError) + Send>;

struct Poller<T> {
    transport: T,
    registry: Arc<EventRegistry>,
    buffer_len: usize,
    closing: Arc<AtomicBool>,
}

impl<T: UsbTransport> Poller<T> {
    /// One interrupt read. Timeouts and stalls are absorbed here; any other
    /// transport failure is returned.
    fn poll_once(&self) -> Result<Option<Event>> {
        let bytes = match self.transport.interrupt_in(self.buffer_len) {
            Ok(bytes) => bytes,
            Err(TransportError::Timeout { .. }) => return Ok(None),
            Err(TransportError::Stall) => {
                warn!("Interrupt endpoint stalled");
                self.transport
                    .clear_halt(Endpoint::InterruptIn)
                    .map_err(|e| PtpError::transfer(Endpoint::InterruptIn, e))?;
                return Ok(None);
            }
            Err(e) => return Err(PtpError::transfer(Endpoint::InterruptIn, e)),
        };
        if bytes.is_empty() {
            return Ok(None);
        }

        let event = match Container::decode(&bytes).and_then(|c| Event::from_container(&c)) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, len = bytes.len(), "Dropping malformed event");
                return Ok(None);
            }
        };
        let delivered = self.registry.dispatch(&event);
        debug!(event = %event.name(), params = ?event.params, delivered, "Event");
        Ok(Some(event))
    }

    fn run(self, on_fatal: FatalHandler) {
        loop {
            if self.closing.load(Ordering::SeqCst) {
                break;
            }
            match self.poll_once() {
                Ok(_) => {}
                Err(PtpError::TransferFailed {
                    source: TransportError::Cancelled,
                    ..
                }) if self.closing.load(Ordering::SeqCst) => break,
                Err(e) => {
                    warn!(error = %e, "Event listener stopped");
                    on_fatal(e);
                    return;
                }
            }
        }
        trace!("Event listener exited");
    }
}

/// Interrupt-in read loop running on its own thread.
pub struct EventListener {
    closing: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl EventListener {
    pub fn start<T: UsbTransport + 'static>(
        transport: T,
        registry: Arc<EventRegistry>,
        buffer_len: usize,
        on_fatal: FatalHandler,
    ) -> Result<Self> {
        let closing = Arc::new(AtomicBool::new(false));
        let poller = Poller {
            transport,
            registry,
            buffer_len,
            closing: Arc::clone(&closing),
        };
        let worker = thread::Builder::new()
            .name("ptp-events".into())
            .spawn(move || poller.run(on_fatal))?;
        info!(buffer_len, "Event listener started");
        Ok(Self {
            closing,
            worker: Some(worker),
        })
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Stop re-arming and wait for the pending read to return.
    pub fn stop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Event listener panicked");
            }
        }
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn no_fatal() -> FatalHandler {
        Box::new(|e: PtpError| panic!("unexpected fatal error {e}"))
    }

    #[test]
    fn test_event_from_container() {
        let ev = Event::from_container(&Container::event(event::OBJECT_ADDED, 0, &[0x10])).unwrap();
        assert_eq!(ev.code, event::OBJECT_ADDED);
        assert_eq!(ev.params, vec![0x10]);
        assert_eq!(ev.name(), "ObjectAdded");

        let resp = Container::response(0x2001, 1, &[]);
        assert!(matches!(
            Event::from_container(&resp),
            Err(PtpError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_registry_dispatch_and_remove() {
        let registry = EventRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let id = registry.on_event_code(event::OBJECT_ADDED, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&hits);
        registry.on_event_code(event::OBJECT_ADDED, move |_| {
            counter.fetch_add(10, Ordering::SeqCst);
        });

        let ev = Event {
            code: event::OBJECT_ADDED,
            transaction_id: 0,
            params: vec![1],
        };
        assert_eq!(registry.dispatch(&ev), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 11);

        assert!(registry.off_event_code(event::OBJECT_ADDED, id));
        assert!(!registry.off_event_code(event::OBJECT_ADDED, id));
        assert_eq!(registry.dispatch(&ev), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 21);

        // No listeners: dropped.
        let other = Event {
            code: event::DEVICE_INFO_CHANGED,
            transaction_id: 0,
            params: vec![],
        };
        assert_eq!(registry.dispatch(&other), 0);
    }

    #[test]
    fn test_wait_event_times_out_and_unregisters() {
        let registry = EventRegistry::new();
        let err = registry
            .wait_event(event::OBJECT_ADDED, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, PtpError::Timeout { timeout_ms: 20 }));
        assert_eq!(registry.listener_count(event::OBJECT_ADDED), 0);
    }

    #[test]
    fn test_listener_delivers_events() {
        let mock = Arc::new(MockTransport::new());
        let registry = Arc::new(EventRegistry::new());
        let mut listener =
            EventListener::start(Arc::clone(&mock), Arc::clone(&registry), 512, no_fatal()).unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.wait_event(event::OBJECT_ADDED, Duration::from_secs(2)))
        };
        assert!(wait_until(|| registry.listener_count(event::OBJECT_ADDED) == 1));

        mock.queue_event(&Container::event(event::OBJECT_ADDED, 0, &[0x1234]));
        let ev = waiter.join().unwrap().unwrap();
        assert_eq!(ev.params, vec![0x1234]);

        listener.stop();
        assert!(!listener.is_running());
    }

    #[test]
    fn test_listener_survives_stall_and_garbage() {
        let mock = Arc::new(MockTransport::new());
        let registry = Arc::new(EventRegistry::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        registry.on_event_code(event::CAPTURE_COMPLETE, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        mock.queue_interrupt_error(TransportError::Stall);
        mock.queue_event(&Container::response(0x2001, 3, &[]));
        mock.queue_event(&Container::event(event::CAPTURE_COMPLETE, 0, &[]));
        let mut listener =
            EventListener::start(Arc::clone(&mock), Arc::clone(&registry), 512, no_fatal()).unwrap();

        assert!(wait_until(|| seen.load(Ordering::SeqCst) == 1));
        assert_eq!(mock.halts_cleared(), vec![Endpoint::InterruptIn]);
        assert!(listener.is_running());
        listener.stop();
    }

    #[test]
    fn test_listener_reports_fatal_error() {
        let mock = Arc::new(MockTransport::new());
        let registry = Arc::new(EventRegistry::new());
        let (tx, rx) = mpsc::channel();

        mock.queue_interrupt_error(TransportError::Disconnected);
        let listener = EventListener::start(
            Arc::clone(&mock),
            registry,
            512,
            Box::new(move |e: PtpError| {
                let _ = tx.send(e);
            }),
        )
        .unwrap();

        let err = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(
            err,
            PtpError::TransferFailed {
                endpoint: Endpoint::InterruptIn,
                source: TransportError::Disconnected
            }
        ));
        assert!(wait_until(|| !listener.is_running()));
    }

    /// Interrupt pipe whose read blocks until the listener is closing and
    /// then completes as cancelled, like a real transfer aborted on close.
    #[derive(Default)]
    struct CancelOnClose {
        closing: Mutex<Option<Arc<AtomicBool>>>,
        reads: AtomicUsize,
        cancelled: AtomicBool,
    }

    impl UsbTransport for CancelOnClose {
        fn bulk_out(&self, _data: &[u8]) -> std::result::Result<usize, TransportError> {
            Err(TransportError::Disconnected)
        }

        fn bulk_in(&self, _max_len: usize) -> std::result::Result<Vec<u8>, TransportError> {
            Err(TransportError::Disconnected)
        }

        fn interrupt_in(&self, _max_len: usize) -> std::result::Result<Vec<u8>, TransportError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            loop {
                let closing = self.closing.lock().unwrap().clone();
                if closing.is_some_and(|c| c.load(Ordering::SeqCst)) {
                    self.cancelled.store(true, Ordering::SeqCst);
                    return Err(TransportError::Cancelled);
                }
                thread::sleep(Duration::from_millis(1));
            }
        }

        fn clear_halt(&self, _endpoint: Endpoint) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn vendor_id(&self) -> u16 {
            0
        }

        fn product_id(&self) -> u16 {
            0
        }
    }

    #[test]
    fn test_cancel_during_close_is_swallowed() {
        let transport = Arc::new(CancelOnClose::default());
        let registry = Arc::new(EventRegistry::new());
        let (tx, rx) = mpsc::channel();
        let mut listener = EventListener::start(
            Arc::clone(&transport),
            registry,
            512,
            Box::new(move |e: PtpError| {
                let _ = tx.send(e);
            }),
        )
        .unwrap();
        *transport.closing.lock().unwrap() = Some(Arc::clone(&listener.closing));

        // The loop is parked inside the read when close begins.
        assert!(wait_until(|| transport.reads.load(Ordering::SeqCst) > 0));
        listener.stop();

        assert!(transport.cancelled.load(Ordering::SeqCst));
        assert_eq!(transport.reads.load(Ordering::SeqCst), 1);
        assert!(!listener.is_running());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cancel_without_close_is_fatal() {
        let mock = Arc::new(MockTransport::new());
        let registry = Arc::new(EventRegistry::new());
        let (tx, rx) = mpsc::channel();

        mock.queue_interrupt_error(TransportError::Cancelled);
        let listener = EventListener::start(
            Arc::clone(&mock),
            registry,
            512,
            Box::new(move |e: PtpError| {
                let _ = tx.send(e);
            }),
        )
        .unwrap();

        let err = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(
            err,
            PtpError::TransferFailed {
                endpoint: Endpoint::InterruptIn,
                source: TransportError::Cancelled
            }
        ));
        assert!(wait_until(|| !listener.is_running()));
    }
}
