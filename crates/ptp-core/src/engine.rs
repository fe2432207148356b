//! Transaction engine.
//!
//! Every operation is queued on a single worker thread, so exactly one
//! Command/Data/Response exchange is on the bulk pipe at any time:
//!
//! ```text
//! caller ──Job──▶ [FIFO] ──▶ worker: Command ─▶ (Data) ─▶ Response ─▶ reply
//! ```
//!
//! The worker owns the transport's bulk side and the transaction-ID
//! counter. Callers wait for their reply with a timeout; a job whose caller
//! already gave up is skipped instead of being sent to the device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::error::{PtpError, Result};
use crate::observer::{PacketDirection, SessionEvent, SessionObserver};
use crate::protocol::{Container, ContainerType, HEADER_LEN, MAX_PARAMS, describe, response};
use crate::transport::{Endpoint, TransportError, UsbTransport};

/// Read size for a Response container (header plus the maximum parameters).
const RESPONSE_READ_LEN: usize = HEADER_LEN + MAX_PARAMS * 4;

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Total attempts while the device keeps answering DeviceBusy.
    pub busy_retry_limit: u32,
    /// Sleep between busy attempts.
    pub busy_backoff: Duration,
    /// Time a caller waits for its reply, queueing included.
    pub call_timeout: Duration,
    /// Default first bulk-in request for `receive_data`.
    pub max_receive_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            busy_retry_limit: 10,
            busy_backoff: Duration::from_millis(100),
            call_timeout: Duration::from_secs(30),
            max_receive_len: 10_000,
        }
    }
}

/// Response phase of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub params: Vec<u32>,
}

/// Response of a transaction with a data-in phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataResponse {
    pub code: u16,
    pub params: Vec<u32>,
    pub data: Vec<u8>,
}

impl From<DataResponse> for Response {
    fn from(r: DataResponse) -> Self {
        Self {
            code: r.code,
            params: r.params,
        }
    }
}

/// Transaction ID generator. IDs 0 and 0xFFFFFFFF are never produced.
#[derive(Debug, Default)]
pub struct TransactionCounter {
    last: u32,
}

impl TransactionCounter {
    const MAX_ID: u32 = 0xFFFF_FFFE;

    pub fn starting_after(last: u32) -> Self {
        Self { last }
    }

    pub fn next(&mut self) -> u32 {
        self.last = if self.last >= Self::MAX_ID { 1 } else { self.last + 1 };
        self.last
    }

    pub fn last(&self) -> u32 {
        self.last
    }
}

#[derive(Debug)]
struct Request {
    code: u16,
    params: Vec<u32>,
    data: Option<Vec<u8>>,
    expected: Vec<u16>,
    /// Set for operations with a data-in phase.
    receive_len: Option<usize>,
}

struct Job {
    request: Request,
    deadline: Instant,
    reply: mpsc::SyncSender<Result<DataResponse>>,
}

enum Outcome {
    Completed(DataResponse),
    Busy,
}

/// Worker-side state: the only code that touches the bulk endpoints.
struct Transactor<T> {
    transport: T,
    counter: TransactionCounter,
    config: EngineConfig,
    observer: Arc<dyn SessionObserver>,
}

impl<T: UsbTransport> Transactor<T> {
    fn run(&mut self, req: &Request) -> Result<DataResponse> {
        let limit = self.config.busy_retry_limit.max(1);
        for attempt in 1..=limit {
            match self.attempt(req)? {
                Outcome::Completed(resp) => return Ok(resp),
                Outcome::Busy => {
                    warn!(op = %describe(req.code), attempt, limit, "Device busy");
                    if attempt < limit {
                        self.observer.on_event(&SessionEvent::BusyRetry {
                            code: req.code,
                            attempt,
                        });
                        thread::sleep(self.config.busy_backoff);
                    }
                }
            }
        }
        Err(PtpError::ExhaustedRetries {
            code: req.code,
            attempts: limit,
        })
    }

    /// One full exchange under a fresh transaction ID.
    fn attempt(&mut self, req: &Request) -> Result<Outcome> {
        let tid = self.counter.next();

        self.send(&Container::command(req.code, tid, &req.params))?;
        if let Some(payload) = &req.data {
            self.send(&Container::data(req.code, tid, payload.clone()))?;
        }

        let mut data = Vec::new();
        let mut container = self.receive(tid, req.receive_len.unwrap_or(RESPONSE_READ_LEN))?;
        if req.receive_len.is_some() && container.kind == ContainerType::Data {
            data = container.payload;
            container = self.receive(tid, RESPONSE_READ_LEN)?;
        }

        if container.kind != ContainerType::Response {
            return Err(PtpError::ProtocolViolation(format!(
                "expected Response to {}, got {} container",
                describe(req.code),
                container.kind
            )));
        }

        let params = container.params()?;
        if container.code == response::DEVICE_BUSY && !req.expected.contains(&response::DEVICE_BUSY) {
            return Ok(Outcome::Busy);
        }
        if !req.expected.contains(&container.code) {
            return Err(PtpError::UnexpectedResponseCode {
                expected: req.expected.clone(),
                actual: container.code,
            });
        }

        debug!(
            op = %describe(req.code),
            tid,
            response = %describe(container.code),
            data_len = data.len(),
            "Transaction complete"
        );
        Ok(Outcome::Completed(DataResponse {
            code: container.code,
            params,
            data,
        }))
    }

    fn send(&mut self, container: &Container) -> Result<()> {
        let bytes = container.encode();
        match self.transport.bulk_out(&bytes) {
            Ok(n) if n == bytes.len() => {}
            Ok(n) => {
                return Err(PtpError::transfer(
                    Endpoint::BulkOut,
                    TransportError::ShortWrite {
                        written: n,
                        expected: bytes.len(),
                    },
                ));
            }
            Err(e) => return Err(self.transfer_failed(Endpoint::BulkOut, e)),
        }
        self.emit_packet(PacketDirection::Tx, container);
        Ok(())
    }

    /// Read one container and check it belongs to `tid`.
    fn receive(&mut self, tid: u32, max_len: usize) -> Result<Container> {
        let container = self.read_container(max_len)?;
        if container.transaction_id != tid {
            return Err(PtpError::TransactionIdMismatch {
                sent: tid,
                received: container.transaction_id,
            });
        }
        Ok(container)
    }

    fn read_container(&mut self, max_len: usize) -> Result<Container> {
        let mut bytes = self.read_bulk(max_len)?;
        if bytes.is_empty() {
            // Zero-length packet closing the previous data phase.
            bytes = self.read_bulk(max_len)?;
        }
        if bytes.len() < HEADER_LEN {
            return Err(PtpError::ProtocolViolation(format!(
                "short container: {} bytes",
                bytes.len()
            )));
        }

        let declared = Container::declared_len(&bytes)?;
        let kind = ContainerType::from_u16(u16::from_le_bytes([bytes[4], bytes[5]]));
        if let Some(kind) = kind.filter(|k| k.carries_params()) {
            if declared > RESPONSE_READ_LEN {
                return Err(PtpError::ProtocolViolation(format!(
                    "{} container declares {} bytes",
                    kind, declared
                )));
            }
        }

        // Only a Data container can be longer than one read; pull it in
        // bounded chunks so a bogus length never sizes a single buffer.
        let chunk_cap = self.config.max_receive_len.max(RESPONSE_READ_LEN);
        while bytes.len() < declared {
            let chunk = self.read_bulk((declared - bytes.len()).min(chunk_cap))?;
            if chunk.is_empty() {
                return Err(PtpError::ProtocolViolation(format!(
                    "container truncated at {} of {} bytes",
                    bytes.len(),
                    declared
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        let container = Container::decode(&bytes)?;
        self.emit_packet(PacketDirection::Rx, &container);
        Ok(container)
    }

    fn read_bulk(&mut self, max_len: usize) -> Result<Vec<u8>> {
        self.transport
            .bulk_in(max_len)
            .map_err(|e| self.transfer_failed(Endpoint::BulkIn, e))
    }

    /// A stall is cleared so the next transaction can use the pipe, but
    /// the failure is still reported.
    fn transfer_failed(&self, endpoint: Endpoint, err: TransportError) -> PtpError {
        if matches!(err, TransportError::Stall) {
            if let Err(e) = self.transport.clear_halt(endpoint) {
                warn!(%endpoint, error = %e, "Failed to clear halt");
            }
        }
        PtpError::transfer(endpoint, err)
    }

    fn emit_packet(&self, direction: PacketDirection, container: &Container) {
        debug!(dir = %direction, container = ?container, "Bulk container");
        self.observer.on_event(&SessionEvent::Packet {
            direction,
            kind: container.kind,
            code: container.code,
            transaction_id: container.transaction_id,
            length: container.len(),
        });
    }
}

/// Handle to the engine worker; cheap to share behind an `Arc`.
pub struct TransactionEngine {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closing: Arc<AtomicBool>,
    config: EngineConfig,
}

impl TransactionEngine {
    /// Spawn the worker thread for `transport`.
    pub fn start<T: UsbTransport + 'static>(
        transport: T,
        config: EngineConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self> {
        let (sender, jobs) = mpsc::channel::<Job>();
        let closing = Arc::new(AtomicBool::new(false));

        let mut transactor = Transactor {
            transport,
            counter: TransactionCounter::default(),
            config: config.clone(),
            observer,
        };
        let worker_closing = Arc::clone(&closing);
        let worker = thread::Builder::new()
            .name("ptp-engine".into())
            .spawn(move || {
                for job in jobs {
                    if worker_closing.load(Ordering::SeqCst) {
                        let _ = job.reply.send(Err(PtpError::SessionClosed));
                        continue;
                    }
                    if Instant::now() >= job.deadline {
                        debug!(op = %describe(job.request.code), "Skipping expired request");
                        continue;
                    }
                    let result = transactor.run(&job.request);
                    // The caller may have timed out meanwhile.
                    let _ = job.reply.send(result);
                }
                debug!("Engine worker stopped");
            })?;

        info!(
            busy_retry_limit = config.busy_retry_limit,
            call_timeout_ms = config.call_timeout.as_millis() as u64,
            "Transaction engine started"
        );

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            closing,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Command and Response only. An empty `expected` means `[OK]`.
    #[instrument(skip(self), fields(op = %describe(code)))]
    pub fn send_command(&self, code: u16, params: &[u32], expected: &[u16]) -> Result<Response> {
        self.call(Self::request(code, params, expected, None, None)?)
            .map(Response::from)
    }

    /// Command, Data (host to device), Response.
    #[instrument(skip(self, data), fields(op = %describe(code), len = data.len()))]
    pub fn send_data(
        &self,
        code: u16,
        params: &[u32],
        data: Vec<u8>,
        expected: &[u16],
    ) -> Result<Response> {
        self.call(Self::request(code, params, expected, Some(data), None)?)
            .map(Response::from)
    }

    /// Command, optional Data (device to host), Response. `max_len` defaults
    /// to the configured `max_receive_len`; longer containers are reassembled.
    #[instrument(skip(self), fields(op = %describe(code)))]
    pub fn receive_data(
        &self,
        code: u16,
        params: &[u32],
        expected: &[u16],
        max_len: Option<usize>,
    ) -> Result<DataResponse> {
        let max_len = max_len.unwrap_or(self.config.max_receive_len);
        self.call(Self::request(code, params, expected, None, Some(max_len))?)
    }

    fn request(
        code: u16,
        params: &[u32],
        expected: &[u16],
        data: Option<Vec<u8>>,
        receive_len: Option<usize>,
    ) -> Result<Request> {
        if params.len() > MAX_PARAMS {
            return Err(PtpError::TooManyParameters {
                count: params.len(),
                max: MAX_PARAMS,
            });
        }
        Ok(Request {
            code,
            params: params.to_vec(),
            data,
            expected: if expected.is_empty() {
                vec![response::OK]
            } else {
                expected.to_vec()
            },
            receive_len,
        })
    }

    fn call(&self, request: Request) -> Result<DataResponse> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(PtpError::SessionClosed);
        }

        let timeout = self.config.call_timeout;
        let (reply, result) = mpsc::sync_channel(1);
        let job = Job {
            request,
            deadline: Instant::now() + timeout,
            reply,
        };
        {
            let sender = self.sender.lock().map_err(|_| PtpError::SessionClosed)?;
            let sender = sender.as_ref().ok_or(PtpError::SessionClosed)?;
            sender.send(job).map_err(|_| PtpError::SessionClosed)?;
        }

        match result.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(PtpError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(PtpError::SessionClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Stop accepting calls, fail everything still queued, and wait for the
    /// in-flight transaction (bounded by the transport timeout) to finish.
    pub fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("Engine worker panicked");
            }
        }
        info!("Transaction engine closed");
    }
}

impl Drop for TransactionEngine {
    fn drop(&mut self) {
        self.close();
    }
}
