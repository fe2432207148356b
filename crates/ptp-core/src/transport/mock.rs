//! Mock USB transport for testing.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use super::traits::{Endpoint, TransportError, UsbTransport};
use crate::protocol::{Container, ContainerType};

/// Produces the bulk-in replies for a Command container.
pub type Responder = Box<dyn FnMut(&Container) -> Vec<Vec<u8>> + Send>;

/// Direction of a traced container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

/// Mock transport for unit testing engine and listener logic.
pub struct MockTransport {
    /// Queued bulk-in replies.
    bulk_queue: Mutex<VecDeque<Result<Vec<u8>, TransportError>>>,
    /// Queued interrupt-in replies.
    interrupt_queue: Mutex<VecDeque<Result<Vec<u8>, TransportError>>>,
    /// Scripted replies per Command container.
    responder: Mutex<Option<Responder>>,
    /// Errors returned by the next bulk-out writes.
    write_failures: Mutex<VecDeque<TransportError>>,
    /// Delay applied to the next bulk-in read.
    read_delay: Mutex<Option<Duration>>,
    /// Captured writes.
    write_log: Mutex<Vec<Vec<u8>>>,
    /// `max_len` of every bulk-in request.
    read_requests: Mutex<Vec<usize>>,
    /// Endpoints whose halt was cleared.
    halts_cleared: Mutex<Vec<Endpoint>>,
    /// Container types in the order they crossed the bulk pipe.
    trace: Mutex<Vec<(Direction, Option<ContainerType>)>>,
    /// Simulated VID/PID.
    vid: u16,
    pid: u16,
    /// Whether device is "connected".
    connected: AtomicBool,
}

fn container_type(bytes: &[u8]) -> Option<ContainerType> {
    let raw = u16::from_le_bytes([*bytes.get(4)?, *bytes.get(5)?]);
    ContainerType::from_u16(raw)
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            bulk_queue: Mutex::new(VecDeque::new()),
            interrupt_queue: Mutex::new(VecDeque::new()),
            responder: Mutex::new(None),
            write_failures: Mutex::new(VecDeque::new()),
            read_delay: Mutex::new(None),
            write_log: Mutex::new(Vec::new()),
            read_requests: Mutex::new(Vec::new()),
            halts_cleared: Mutex::new(Vec::new()),
            trace: Mutex::new(Vec::new()),
            vid: 0x04A9,
            pid: 0x3218,
            connected: AtomicBool::new(true),
        }
    }

    /// Queue raw bytes to be returned on the next bulk-in read.
    pub fn queue_bulk(&self, bytes: &[u8]) {
        self.bulk_queue.lock().unwrap().push_back(Ok(bytes.to_vec()));
    }

    /// Queue a container to be returned on the next bulk-in read.
    pub fn queue_container(&self, container: &Container) {
        self.queue_bulk(&container.encode());
    }

    /// Queue a bulk-in failure.
    pub fn queue_bulk_error(&self, err: TransportError) {
        self.bulk_queue.lock().unwrap().push_back(Err(err));
    }

    /// Queue an event container on the interrupt pipe.
    pub fn queue_event(&self, container: &Container) {
        self.interrupt_queue
            .lock()
            .unwrap()
            .push_back(Ok(container.encode()));
    }

    /// Queue an interrupt-in failure.
    pub fn queue_interrupt_error(&self, err: TransportError) {
        self.interrupt_queue.lock().unwrap().push_back(Err(err));
    }

    /// Answer every Command container with the replies `f` produces.
    pub fn set_responder(&self, f: impl FnMut(&Container) -> Vec<Vec<u8>> + Send + 'static) {
        *self.responder.lock().unwrap() = Some(Box::new(f));
    }

    /// Make the next bulk-out write fail.
    pub fn fail_next_write(&self, err: TransportError) {
        self.write_failures.lock().unwrap().push_back(err);
    }

    /// Delay the next bulk-in read.
    pub fn delay_next_read(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = Some(delay);
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Captured writes decoded as containers.
    pub fn written_containers(&self) -> Vec<Container> {
        self.get_writes()
            .iter()
            .filter_map(|w| Container::decode(w).ok())
            .collect()
    }

    /// Requested lengths of all bulk-in reads, in order.
    pub fn read_requests(&self) -> Vec<usize> {
        self.read_requests.lock().unwrap().clone()
    }

    pub fn halts_cleared(&self) -> Vec<Endpoint> {
        self.halts_cleared.lock().unwrap().clone()
    }

    pub fn trace(&self) -> Vec<(Direction, Option<ContainerType>)> {
        self.trace.lock().unwrap().clone()
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for MockTransport {
    fn bulk_out(&self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        if let Some(err) = self.write_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.write_log.lock().unwrap().push(data.to_vec());
        let kind = container_type(data);
        self.trace.lock().unwrap().push((Direction::Tx, kind));

        if kind == Some(ContainerType::Command) {
            if let Ok(cmd) = Container::decode(data) {
                if let Some(responder) = self.responder.lock().unwrap().as_mut() {
                    let replies = responder(&cmd);
                    let mut queue = self.bulk_queue.lock().unwrap();
                    queue.extend(replies.into_iter().map(Ok));
                }
            }
        }
        Ok(data.len())
    }

    fn bulk_in(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.read_requests.lock().unwrap().push(max_len);
        if let Some(delay) = self.read_delay.lock().unwrap().take() {
            thread::sleep(delay);
        }
        let mut bytes = self
            .bulk_queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(TransportError::Timeout { timeout_ms: 5000 }))?;
        if bytes.len() > max_len {
            // Split like a real pipe would; the remainder arrives on the next read.
            let rest = bytes.split_off(max_len);
            self.bulk_queue.lock().unwrap().push_front(Ok(rest));
        }
        self.trace
            .lock()
            .unwrap()
            .push((Direction::Rx, container_type(&bytes)));
        Ok(bytes)
    }

    fn interrupt_in(&self, _max_len: usize) -> Result<Vec<u8>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let next = self.interrupt_queue.lock().unwrap().pop_front();
        match next {
            Some(reply) => reply,
            None => {
                // Stand-in for a real interrupt poll interval.
                thread::sleep(Duration::from_millis(5));
                Err(TransportError::Timeout { timeout_ms: 5 })
            }
        }
    }

    fn clear_halt(&self, endpoint: Endpoint) -> Result<(), TransportError> {
        self.halts_cleared.lock().unwrap().push(endpoint);
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{operation, response};

    #[test]
    fn test_mock_bulk_queue() {
        let mock = MockTransport::new();
        mock.queue_container(&Container::response(response::OK, 1, &[]));

        let bytes = mock.bulk_in(512).unwrap();
        assert_eq!(Container::decode(&bytes).unwrap().code, response::OK);

        // Queue is empty now
        assert!(matches!(mock.bulk_in(512), Err(TransportError::Timeout { .. })));
    }

    #[test]
    fn test_mock_splits_long_reads() {
        let mock = MockTransport::new();
        mock.queue_bulk(&[1, 2, 3, 4, 5]);
        assert_eq!(mock.bulk_in(3).unwrap(), vec![1, 2, 3]);
        assert_eq!(mock.bulk_in(3).unwrap(), vec![4, 5]);
        assert_eq!(mock.read_requests(), vec![3, 3]);
    }

    #[test]
    fn test_mock_responder_and_trace() {
        let mock = MockTransport::new();
        mock.set_responder(|cmd| vec![Container::response(response::OK, cmd.transaction_id, &[]).encode()]);

        mock.bulk_out(&Container::command(operation::OPEN_SESSION, 9, &[1]).encode())
            .unwrap();
        let reply = Container::decode(&mock.bulk_in(512).unwrap()).unwrap();
        assert_eq!(reply.transaction_id, 9);
        assert_eq!(
            mock.trace(),
            vec![
                (Direction::Tx, Some(ContainerType::Command)),
                (Direction::Rx, Some(ContainerType::Response)),
            ]
        );
        assert_eq!(mock.written_containers()[0].params().unwrap(), vec![1]);
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.disconnect();
        assert!(!mock.is_connected());
        assert!(mock.bulk_out(b"test").is_err());
        assert!(matches!(mock.interrupt_in(64), Err(TransportError::Disconnected)));

        mock.reconnect();
        mock.queue_bulk(&[1]);
        assert_eq!(mock.bulk_in(64).unwrap(), vec![1]);
    }
}
