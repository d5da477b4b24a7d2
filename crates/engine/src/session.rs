//! Device session lifecycle (spec §4.5, §4.8)
//!
//! A session owns one TCP connection to a remote usbip host: a reader
//! task decoding RET_SUBMIT/RET_UNLINK frames, a writer task draining an
//! outbound queue, and the registry/endpoint-table/seqnum state those
//! tasks and the public API share. All cross-task state lives behind
//! short-held `std::sync::Mutex` guards; nothing is held across `.await`.

use std::io::Cursor;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use protocol::{DeviceSpeed, Direction, Frame, ImportedDeviceFields};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::endpoint::{EndpointKey, EndpointTable};
use crate::error::{EngineError, Result};
use crate::registry::{CompletionStatus, Request, RequestRegistry};
use crate::seq::SequenceAllocator;
use crate::types::{AttachOptions, DeviceLocation};

/// Lifecycle state of a [`DeviceSession`] (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// TCP connected, OP_REQ_IMPORT/OP_REP_IMPORT in flight.
    Handshaking,
    /// Handshake complete, reader/writer tasks running.
    Running,
    /// Reader or writer hit an error (or `detach` was called); no new
    /// submits are accepted, outstanding requests are being drained.
    Draining,
    /// Tasks joined, registry drained, socket gone.
    Closed,
}

/// Callback surface a session reports request completions through
/// (spec §6's `complete(local_handle, status, actual_length, payload)`).
/// Implemented by the caller that owns the `local_handle` namespace; the
/// engine has no opinion on what that token means.
pub trait CompletionSink: Send + Sync {
    fn complete(&self, local_handle: u64, status: CompletionStatus, actual_length: u32, payload: Vec<u8>);
}

/// A no-op sink, for tests and callers that poll state some other way.
#[derive(Debug, Default)]
pub struct NullCompletionSink;

impl CompletionSink for NullCompletionSink {
    fn complete(&self, _local_handle: u64, _status: CompletionStatus, _actual_length: u32, _payload: Vec<u8>) {}
}

/// Delivers completions over an unbounded channel, for callers that want
/// to `.await` them from async code instead of implementing a trait.
#[derive(Debug, Clone)]
pub struct Completion {
    pub local_handle: u64,
    pub status: CompletionStatus,
    pub actual_length: u32,
    pub payload: Vec<u8>,
}

pub struct ChannelCompletionSink(pub mpsc::UnboundedSender<Completion>);

impl CompletionSink for ChannelCompletionSink {
    fn complete(&self, local_handle: u64, status: CompletionStatus, actual_length: u32, payload: Vec<u8>) {
        let _ = self.0.send(Completion {
            local_handle,
            status,
            actual_length,
            payload,
        });
    }
}

struct SessionTasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// One live connection to a remote usbip host and everything needed to
/// submit, cancel, and complete transfers against it.
pub struct DeviceSession {
    location: DeviceLocation,
    devid: u32,
    speed: DeviceSpeed,
    vendor_id: u16,
    product_id: u16,
    state: Arc<Mutex<SessionState>>,
    registry: Arc<RequestRegistry>,
    endpoints: Arc<Mutex<EndpointTable>>,
    seq: SequenceAllocator,
    outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    completion_sink: Arc<dyn CompletionSink>,
    port: AtomicU8,
    tasks: Mutex<Option<SessionTasks>>,
}

fn mark_draining(state: &Mutex<SessionState>) {
    let mut guard = state.lock().expect("session state mutex poisoned");
    if matches!(*guard, SessionState::Handshaking | SessionState::Running) {
        *guard = SessionState::Draining;
    }
}

async fn read_op_import_reply(reader: &mut OwnedReadHalf) -> Result<ImportedDeviceFields> {
    let mut prefix = [0u8; 8];
    reader.read_exact(&mut prefix).await?;
    let status = i32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
    let mut buf = prefix.to_vec();
    if status == 0 {
        let mut body = vec![0u8; 312];
        reader.read_exact(&mut body).await?;
        buf.extend_from_slice(&body);
    }
    Ok(protocol::decode_op_import_reply(&mut Cursor::new(&buf[..]))?)
}

async fn writer_loop(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    state: Arc<Mutex<SessionState>>,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(error) = write_half.write_all(&frame).await {
            tracing::warn!(%error, "session writer failed, draining");
            mark_draining(&state);
            break;
        }
    }
}

/// Drains `count` bytes of iso-descriptor trailer the reader isn't
/// otherwise going to decode (spec §4.1's sentinel rules still apply).
async fn skip_iso_trailer(reader: &mut OwnedReadHalf, number_of_packets: i32) -> std::io::Result<()> {
    let count = number_of_packets as u32;
    if count == 0 || count == u32::MAX {
        return Ok(());
    }
    let mut trailer = vec![0u8; count as usize * 16];
    reader.read_exact(&mut trailer).await
}

async fn reader_loop(
    mut read_half: OwnedReadHalf,
    registry: Arc<RequestRegistry>,
    state: Arc<Mutex<SessionState>>,
    completion_sink: Arc<dyn CompletionSink>,
) {
    loop {
        let mut header_buf = [0u8; 48];
        if let Err(error) = read_half.read_exact(&mut header_buf).await {
            tracing::debug!(%error, "session reader exiting");
            break;
        }
        let frame = match protocol::decode_header(&mut Cursor::new(&header_buf[..])) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(%error, "malformed frame header, draining session");
                break;
            }
        };

        match frame {
            Frame::RetSubmit(header) => {
                let has_payload = header.direction == Direction::In && header.actual_length > 0;
                let matched = registry.remove_by_seqnum(header.seqnum);
                let mut payload = Vec::new();
                if has_payload {
                    payload = vec![0u8; header.actual_length as usize];
                    if read_half.read_exact(&mut payload).await.is_err() {
                        break;
                    }
                }
                if skip_iso_trailer(&mut read_half, header.number_of_packets).await.is_err() {
                    break;
                }
                if let Some(request) = matched {
                    let status = if header.status == 0 {
                        CompletionStatus::Ok
                    } else {
                        CompletionStatus::Error(header.status)
                    };
                    completion_sink.complete(request.local_handle, status, header.actual_length, payload);
                }
                // No match: the request already completed via cancellation
                // racing this reply (spec §4.8); the bytes are drained above
                // and nothing further happens.
            }
            Frame::RetUnlink(header) => {
                if let Some(request) = registry.take_cancelling_by_unlink_seqnum(header.seqnum) {
                    completion_sink.complete(request.local_handle, CompletionStatus::Cancelled, 0, Vec::new());
                }
            }
            Frame::CmdSubmit(_) | Frame::CmdUnlink(_) => {
                tracing::warn!("received a command frame on a client session, draining");
                break;
            }
        }
    }

    mark_draining(&state);
    for request in registry.drain_all() {
        completion_sink.complete(request.local_handle, CompletionStatus::Cancelled, 0, Vec::new());
    }
}

impl DeviceSession {
    /// Connects to `location`, performs the OP_REQ_IMPORT/OP_REP_IMPORT
    /// handshake, and on success spawns the reader/writer tasks and
    /// returns the running session alongside the remote's device fields.
    pub async fn open(
        location: DeviceLocation,
        options: AttachOptions,
        completion_sink: Arc<dyn CompletionSink>,
    ) -> Result<(Arc<DeviceSession>, ImportedDeviceFields)> {
        let addr = format!("{}:{}", location.hostname, location.service);
        let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| EngineError::Unreachable(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out")))??;
        stream.set_nodelay(true).ok();
        let (mut read_half, mut write_half) = stream.into_split();

        let mut request = Vec::new();
        protocol::encode_op_import(&mut request, &location.busid)?;
        tokio::time::timeout(options.connect_timeout, write_half.write_all(&request))
            .await
            .map_err(|_| EngineError::Unreachable(std::io::Error::new(std::io::ErrorKind::TimedOut, "handshake write timed out")))??;

        let fields = tokio::time::timeout(options.connect_timeout, read_op_import_reply(&mut read_half))
            .await
            .map_err(|_| EngineError::Unreachable(std::io::Error::new(std::io::ErrorKind::TimedOut, "handshake read timed out")))??;

        let devid = (fields.busnum << 16) | fields.devnum;

        let state = Arc::new(Mutex::new(SessionState::Running));
        let registry = Arc::new(RequestRegistry::new());
        let endpoints = Arc::new(Mutex::new(EndpointTable::new()));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let writer_state = state.clone();
        let writer = tokio::spawn(writer_loop(write_half, outbound_rx, writer_state));

        let reader_state = state.clone();
        let reader_registry = registry.clone();
        let reader_sink = completion_sink.clone();
        let reader = tokio::spawn(reader_loop(read_half, reader_registry, reader_state, reader_sink));

        tracing::info!(%location, devid, "session handshake complete");

        let session = Arc::new(DeviceSession {
            location,
            devid,
            speed: fields.speed,
            vendor_id: fields.vendor_id,
            product_id: fields.product_id,
            state,
            registry,
            endpoints,
            seq: SequenceAllocator::new(),
            outbound_tx,
            completion_sink,
            port: AtomicU8::new(0),
            tasks: Mutex::new(Some(SessionTasks { reader, writer })),
        });
        Ok((session, fields))
    }

    pub fn location(&self) -> &DeviceLocation {
        &self.location
    }

    pub fn devid(&self) -> u32 {
        self.devid
    }

    pub fn speed(&self) -> DeviceSpeed {
        self.speed
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("session state mutex poisoned")
    }

    /// Number of requests still in the registry, for tests and
    /// diagnostics.
    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    pub fn port(&self) -> u8 {
        self.port.load(Ordering::Relaxed)
    }

    pub fn set_port(&self, port: u8) {
        self.port.store(port, Ordering::Relaxed);
    }

    /// Installs or replaces an endpoint's descriptor (spec §4.2), e.g.
    /// after parsing a configuration descriptor fetched over the control
    /// pipe.
    pub fn install_endpoint(&self, descriptor: crate::endpoint::EndpointDescriptor) {
        self.endpoints.lock().expect("endpoint table mutex poisoned").install(descriptor);
    }

    /// Replaces the endpoints of `interface`, cancelling any pending
    /// requests on the endpoints it displaces with `CompletionStatus::
    /// Stalled` (spec §4.2).
    pub fn select_alt(&self, interface: u8, endpoints: Vec<crate::endpoint::EndpointDescriptor>) -> Vec<EndpointKey> {
        let displaced = self
            .endpoints
            .lock()
            .expect("endpoint table mutex poisoned")
            .select_alt(interface, endpoints);
        for key in &displaced {
            for request in self.registry.drain_by_endpoint(*key) {
                self.completion_sink
                    .complete(request.local_handle, CompletionStatus::Stalled, 0, Vec::new());
            }
        }
        displaced
    }

    /// Submits a transfer on `endpoint_key`, completing asynchronously
    /// through the session's [`CompletionSink`]. `local_handle` is the
    /// caller's own correlation token (spec §3).
    #[allow(clippy::too_many_arguments)]
    pub fn submit(
        &self,
        local_handle: u64,
        endpoint_key: EndpointKey,
        transfer_flags: u32,
        transfer_buffer_length: i32,
        setup: Option<[u8; 8]>,
        payload: Vec<u8>,
    ) -> Result<()> {
        if self.state() != SessionState::Running {
            return Err(EngineError::Gone);
        }
        let endpoint = self
            .endpoints
            .lock()
            .expect("endpoint table mutex poisoned")
            .lookup(endpoint_key)
            .ok_or(EngineError::InvalidEndpoint(endpoint_key))?;

        let seqnum = self.seq.next(endpoint_key.direction)?;
        let setup_bytes = setup.unwrap_or([0u8; 8]);
        let out_payload: &[u8] = if endpoint_key.direction == Direction::Out { &payload } else { &[] };

        let mut frame = Vec::new();
        protocol::encode_cmd_submit(
            &mut frame,
            seqnum,
            self.devid,
            endpoint_key.direction,
            endpoint_key.address as u32,
            transfer_flags,
            transfer_buffer_length,
            0,
            0,
            endpoint.interval as i32,
            setup_bytes,
            out_payload,
        )?;

        let request = Request::new(
            seqnum,
            endpoint_key,
            endpoint_key.direction,
            transfer_flags,
            transfer_buffer_length,
            setup,
            payload,
            local_handle,
        );
        self.registry.insert(request);

        if self.outbound_tx.send(frame).is_err() {
            self.registry.remove_by_seqnum(seqnum);
            return Err(EngineError::Gone);
        }
        Ok(())
    }

    /// Requests cancellation of the in-flight request identified by
    /// `local_handle`. A no-op if it already completed, or if it's
    /// already cancelling (spec §4.5's idempotent cancel).
    pub fn cancel(&self, local_handle: u64) {
        let Some(seqnum) = self.registry.find_by_local_handle(local_handle) else {
            return;
        };
        let Some((endpoint_key, direction)) = self.registry.endpoint_of(seqnum) else {
            return;
        };
        let Ok(unlink_seqnum) = self.seq.next(direction) else {
            return;
        };
        if !self.registry.mark_cancelling(seqnum, unlink_seqnum) {
            return;
        }
        let mut frame = Vec::new();
        if protocol::encode_cmd_unlink(&mut frame, unlink_seqnum, self.devid, direction, endpoint_key.address as u32, seqnum).is_ok() {
            let _ = self.outbound_tx.send(frame);
        }
    }

    /// Tears the session down: stops the reader/writer tasks, completes
    /// every outstanding request as `Cancelled`, and transitions to
    /// `Closed`. Idempotent.
    pub async fn detach(&self) {
        {
            let mut guard = self.state.lock().expect("session state mutex poisoned");
            if *guard == SessionState::Closed {
                return;
            }
            *guard = SessionState::Draining;
        }

        let tasks = self.tasks.lock().expect("session tasks mutex poisoned").take();
        if let Some(tasks) = tasks {
            tasks.reader.abort();
            tasks.writer.abort();
            let _ = tasks.reader.await;
            let _ = tasks.writer.await;
        }

        for request in self.registry.drain_all() {
            self.completion_sink.complete(request.local_handle, CompletionStatus::Cancelled, 0, Vec::new());
        }

        *self.state.lock().expect("session state mutex poisoned") = SessionState::Closed;
        tracing::info!(location = %self.location, "session closed");
    }
}
