//! Transaction engine: drives command, data and response phases.
//!
//! Every MTP operation is one transaction:
//!
//! ```text
//! host                                device
//!  | -- Command(op, tx, params) ------> |
//!  | -- Data(op, tx, payload) --------> |   (outbound data phase)
//!  | <------- Data(op, tx, payload) --- |   (inbound data phase)
//!  | <------- Response(code, tx, ...) - |
//! ```
//!
//! Data payloads larger than one transfer are split into a header-bearing
//! buffer followed by raw continuation buffers. Object data is streamed
//! through `Read`/`Write` chunk by chunk and never buffered whole.

use crate::codes::{OperationCode, ResponseCode};
use crate::container::{
    Container, ContainerHeader, ContainerType, HEADER_SIZE, UNKNOWN_LENGTH, encode_container,
};
use crate::error::{Error, ProtocolError, Result};
use mtp_transport::{
    CancelToken, ControlChannel, Direction, Transport, TransportError, TransportStats,
};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Cumulative progress callback, called with the payload bytes moved so far
pub type Progress<'a> = Option<&'a mut dyn FnMut(u64)>;

/// Timeouts for each transaction phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimeouts {
    /// Sending the command container
    pub command: Duration,
    /// Each buffer of the data phase
    pub data: Duration,
    /// Waiting for the response container
    pub response: Duration,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            command: Duration::from_secs(5),
            data: Duration::from_secs(30),
            response: Duration::from_secs(30),
        }
    }
}

/// Transaction engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Preferred bytes per bulk transfer, rounded down to the max packet size
    pub chunk_size: usize,
    /// Phase timeouts
    pub timeouts: PhaseTimeouts,
    /// How long to drain stale inbound data after an abort
    pub drain_timeout: Duration,
    /// Response codes treated as success
    pub success_codes: Vec<ResponseCode>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256 * 1024,
            timeouts: PhaseTimeouts::default(),
            drain_timeout: Duration::from_millis(200),
            success_codes: vec![ResponseCode::OK],
        }
    }
}

/// Data phase of a transaction
pub enum DataPhase<'a> {
    /// No data phase
    None,
    /// Host sends `size` bytes read from the reader
    Send(&'a mut dyn Read, u64),
    /// Device sends data, written to the writer
    Receive(&'a mut dyn Write),
}

/// Decoded response of a successful transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response code (one of the configured success codes)
    pub code: ResponseCode,
    /// Transaction the response belongs to
    pub transaction_id: u32,
    /// Response parameters
    pub params: Vec<u32>,
}

impl Response {
    /// Parameter at `index`
    ///
    /// # Errors
    /// Returns `MissingResponseParameter` if the device sent fewer
    pub fn param(&self, index: usize) -> Result<u32> {
        self.params
            .get(index)
            .copied()
            .ok_or(Error::Protocol(ProtocolError::MissingResponseParameter(index)))
    }
}

/// Transaction id allocator.
///
/// Ids start at 1, increase by one and wrap from `u32::MAX` back to 1;
/// 0 is never issued.
#[derive(Debug, Clone)]
pub struct TransactionIds {
    next: u32,
}

impl Default for TransactionIds {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl TransactionIds {
    /// Allocator whose next id is `first` (0 is bumped to 1)
    #[must_use]
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: first.max(1),
        }
    }

    /// Allocate the next id
    pub fn allocate(&mut self) -> u32 {
        let id = self.next;
        self.next = if id == u32::MAX { 1 } else { id + 1 };
        id
    }

    /// Id the next allocation will return
    #[must_use]
    pub fn peek(&self) -> u32 {
        self.next
    }
}

/// Id of the transaction in flight, 0 when idle.
///
/// Held while the engine re-arms the cancel token for a new transaction and
/// while an abort sets it, so a cancel always lands on the id it was aimed at.
type InFlight = Arc<Mutex<u32>>;

fn lock(in_flight: &Mutex<u32>) -> MutexGuard<'_, u32> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Thread-safe handle that cancels the transaction in flight
#[derive(Clone)]
pub struct AbortHandle {
    cancel: CancelToken,
    current: InFlight,
    control: Arc<dyn ControlChannel>,
}

impl AbortHandle {
    /// Cancel the transaction currently executing on the session.
    ///
    /// Sets the cancel token (so the worker gives up at the next poll or
    /// chunk boundary) and asks the device to cancel through the control
    /// channel. Returns immediately; the worker thread performs endpoint
    /// recovery. When no transaction is in flight this is a no-op.
    ///
    /// # Errors
    /// Returns the transport error if the control request fails
    pub fn abort_current_transaction(&self, timeout: Duration) -> Result<()> {
        let tx = self.current_transaction();
        if tx == 0 {
            tracing::info!("Abort requested with no transaction in flight");
            return Ok(());
        }
        self.abort_transaction(tx, timeout)
    }

    /// Cancel transaction `tx` if it is still in flight.
    ///
    /// A transaction that already finished is left alone, and so is any
    /// transaction started after it.
    ///
    /// # Errors
    /// Returns the transport error if the control request fails
    pub fn abort_transaction(&self, tx: u32, timeout: Duration) -> Result<()> {
        {
            let current = lock(&self.current);
            if tx == 0 || *current != tx {
                tracing::debug!(tx, current = *current, "Transaction no longer in flight");
                return Ok(());
            }
            self.cancel.cancel();
        }
        tracing::warn!(tx, "Aborting transaction");
        self.control.request_abort(tx, timeout)?;
        Ok(())
    }

    /// Transaction id in flight, 0 when idle
    #[must_use]
    pub fn current_transaction(&self) -> u32 {
        *lock(&self.current)
    }
}

impl std::fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortHandle")
            .field("current", &self.current_transaction())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Round `chunk` down to a multiple of the max packet size, at least one packet
fn round_chunk(chunk: usize, max_packet_size: usize) -> usize {
    let mps = max_packet_size.max(1);
    let chunk = chunk.max(mps);
    chunk - chunk % mps
}

/// Drives MTP transactions over a [`Transport`]
pub struct TransactionEngine {
    transport: Box<dyn Transport>,
    control: Arc<dyn ControlChannel>,
    ids: TransactionIds,
    current: InFlight,
    cancel: CancelToken,
    config: EngineConfig,
    chunk_size: usize,
    max_packet_size: usize,
    /// Bytes received past the end of the previous container
    pending: Option<Vec<u8>>,
}

impl TransactionEngine {
    /// Create an engine owning `transport`
    #[must_use]
    pub fn new(transport: Box<dyn Transport>, config: EngineConfig) -> Self {
        let max_packet_size = transport.max_packet_size().max(1);
        let chunk_size = round_chunk(config.chunk_size, max_packet_size);
        let control = transport.control();
        Self {
            transport,
            control,
            ids: TransactionIds::default(),
            current: Arc::new(Mutex::new(0)),
            cancel: CancelToken::new(),
            config,
            chunk_size,
            max_packet_size,
            pending: None,
        }
    }

    /// Replace the id allocator
    pub fn set_transaction_ids(&mut self, ids: TransactionIds) {
        self.ids = ids;
    }

    /// Handle that aborts the transaction in flight from another thread
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            cancel: self.cancel.clone(),
            current: Arc::clone(&self.current),
            control: Arc::clone(&self.control),
        }
    }

    /// Bytes per bulk transfer after rounding
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Id the next transaction will use
    #[must_use]
    pub fn next_transaction_id(&self) -> u32 {
        self.ids.peek()
    }

    /// Transport statistics
    #[must_use]
    pub fn transport_stats(&self) -> TransportStats {
        self.transport.stats()
    }

    /// Run one transaction.
    ///
    /// # Errors
    /// Returns `Device` for a non-success response, `Protocol` for malformed
    /// or mismatched containers, `Transport` for I/O failures (`Aborted` after
    /// a cancellation) and `Io` for local reader/writer failures
    pub fn execute(
        &mut self,
        op: OperationCode,
        params: &[u32],
        data: DataPhase<'_>,
        progress: Progress<'_>,
    ) -> Result<Response> {
        let tx = self.ids.allocate();
        let span = tracing::debug_span!("transaction", op = %op, tx);
        let _enter = span.enter();

        {
            let mut current = lock(&self.current);
            self.cancel.reset();
            *current = tx;
        }
        let result = self.run(op, tx, params, data, progress);
        *lock(&self.current) = 0;

        match result {
            Err(Error::Transport(_)) if self.cancel.is_cancelled() => {
                self.recover_from_abort(tx);
                Err(TransportError::Aborted.into())
            }
            Err(Error::Transport(TransportError::Aborted)) => {
                self.recover_from_abort(tx);
                Err(TransportError::Aborted.into())
            }
            Err(Error::Io(err)) if self.cancel.is_cancelled() => {
                tracing::debug!("Local I/O error after abort: {}", err);
                self.recover_from_abort(tx);
                Err(TransportError::Aborted.into())
            }
            other => other,
        }
    }

    /// Run a transaction whose data phase, if any, is read into memory
    ///
    /// # Errors
    /// See [`TransactionEngine::execute`]
    pub fn execute_read(
        &mut self,
        op: OperationCode,
        params: &[u32],
    ) -> Result<(Response, Vec<u8>)> {
        let mut data = Vec::new();
        let response = self.execute(op, params, DataPhase::Receive(&mut data), None)?;
        Ok((response, data))
    }

    /// Run a transaction that sends `payload` in its data phase
    ///
    /// # Errors
    /// See [`TransactionEngine::execute`]
    pub fn execute_write(
        &mut self,
        op: OperationCode,
        params: &[u32],
        payload: &[u8],
    ) -> Result<Response> {
        let mut reader = payload;
        self.execute(
            op,
            params,
            DataPhase::Send(&mut reader, payload.len() as u64),
            None,
        )
    }

    /// Run a transaction without a data phase
    ///
    /// # Errors
    /// See [`TransactionEngine::execute`]
    pub fn execute_command(&mut self, op: OperationCode, params: &[u32]) -> Result<Response> {
        self.execute(op, params, DataPhase::None, None)
    }

    fn run(
        &mut self,
        op: OperationCode,
        tx: u32,
        params: &[u32],
        data: DataPhase<'_>,
        progress: Progress<'_>,
    ) -> Result<Response> {
        let command = encode_container(ContainerType::Command, op.0, tx, params, None);
        tracing::debug!(
            kind = "command",
            code = op.0,
            tx,
            len = command.len(),
            "Sending container"
        );
        self.send(&command, self.config.timeouts.command)?;

        match data {
            DataPhase::None => {}
            DataPhase::Send(reader, size) => {
                self.send_data(op, tx, reader, size, progress)?;
            }
            DataPhase::Receive(writer) => {
                if let Some(response) = self.receive_data(op, tx, writer, progress)? {
                    return self.finish(response);
                }
            }
        }

        let timeout = self.config.timeouts.response;
        let first = self.next_container_buffer(timeout)?;
        let response = self.complete_container(first, timeout)?;
        self.check_transaction(tx, response.transaction_id)?;
        if response.kind != ContainerType::Response {
            return Err(ProtocolError::UnexpectedContainer(response.kind.as_str()).into());
        }
        self.finish(response)
    }

    fn finish(&self, container: Container) -> Result<Response> {
        let code = ResponseCode(container.code);
        tracing::debug!(
            kind = "response",
            code = %code,
            tx = container.transaction_id,
            len = HEADER_SIZE + container.payload.len(),
            "Received container"
        );
        if !self.config.success_codes.contains(&code) {
            return Err(Error::Device(code));
        }
        Ok(Response {
            code,
            transaction_id: container.transaction_id,
            params: container.params()?,
        })
    }

    fn check_transaction(&self, expected: u32, actual: u32) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(ProtocolError::TransactionIdMismatch { expected, actual }.into())
        }
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(TransportError::Aborted.into())
        } else {
            Ok(())
        }
    }

    /// Send one buffer, retrying once after clearing a stalled endpoint
    fn send(&mut self, buf: &[u8], timeout: Duration) -> Result<()> {
        self.check_cancel()?;
        match self.transport.send(buf, timeout, &self.cancel) {
            Err(TransportError::Stall(direction)) => {
                tracing::warn!("Endpoint {} stalled during send; clearing halt", direction);
                self.transport.clear_halt(direction)?;
                self.transport.send(buf, timeout, &self.cancel)?;
                Ok(())
            }
            other => Ok(other?),
        }
    }

    /// Receive one buffer, retrying once after clearing a stalled endpoint
    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        if let Some(buf) = self.pending.take() {
            return Ok(buf);
        }
        self.check_cancel()?;
        match self.transport.receive(self.chunk_size, timeout, &self.cancel) {
            Err(TransportError::Stall(direction)) => {
                tracing::warn!("Endpoint {} stalled during receive; clearing halt", direction);
                self.transport.clear_halt(direction)?;
                Ok(self.transport.receive(self.chunk_size, timeout, &self.cancel)?)
            }
            other => Ok(other?),
        }
    }

    /// Receive the first buffer of a container, skipping zero-length packets.
    ///
    /// A header cut off at a transfer boundary is joined with the next buffer.
    fn next_container_buffer(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let mut buf = loop {
            let buf = self.receive(timeout)?;
            if !buf.is_empty() {
                break buf;
            }
            tracing::trace!("Skipping zero-length packet");
        };
        while buf.len() < HEADER_SIZE {
            self.check_cancel()?;
            let more = self.receive(timeout)?;
            if more.is_empty() {
                break;
            }
            buf.extend_from_slice(&more);
        }
        Ok(buf)
    }

    /// Read the rest of a short container whose first buffer is `buf`
    fn complete_container(&mut self, mut buf: Vec<u8>, timeout: Duration) -> Result<Container> {
        let header = ContainerHeader::parse(&buf)?;
        if header.length != UNKNOWN_LENGTH {
            let length = header.length as usize;
            while buf.len() < length {
                self.check_cancel()?;
                let more = self.receive(timeout)?;
                if more.is_empty() {
                    break;
                }
                tracing::trace!(len = more.len(), "Joining split container");
                buf.extend_from_slice(&more);
            }
        }
        Ok(Container::decode(&buf)?)
    }

    fn send_data(
        &mut self,
        op: OperationCode,
        tx: u32,
        reader: &mut dyn Read,
        size: u64,
        mut progress: Progress<'_>,
    ) -> Result<()> {
        let total = size + HEADER_SIZE as u64;
        let header = ContainerHeader {
            length: u32::try_from(total).unwrap_or(UNKNOWN_LENGTH),
            kind: ContainerType::Data,
            code: op.0,
            transaction_id: tx,
        };
        tracing::debug!(kind = "data", code = op.0, tx, len = total, "Sending container");

        let first_len = (self.chunk_size.saturating_sub(HEADER_SIZE) as u64).min(size);
        let mut buf = Vec::with_capacity(self.chunk_size.max(HEADER_SIZE));
        buf.extend_from_slice(&header.to_bytes());
        fill_exact(reader, &mut buf, first_len)?;
        self.send(&buf, self.config.timeouts.data)?;

        let mut sent = first_len;
        if let Some(cb) = progress.as_mut() {
            cb(sent);
        }
        while sent < size {
            self.check_cancel()?;
            let len = (self.chunk_size as u64).min(size - sent);
            buf.clear();
            fill_exact(reader, &mut buf, len)?;
            self.send(&buf, self.config.timeouts.data)?;
            sent += len;
            tracing::trace!(sent, size, "Sent data chunk");
            if let Some(cb) = progress.as_mut() {
                cb(sent);
            }
        }

        if total % self.max_packet_size as u64 == 0 {
            tracing::trace!("Sending zero-length packet");
            self.send(&[], self.config.timeouts.data)?;
        }
        Ok(())
    }

    /// Receive the data phase into `writer`.
    ///
    /// Returns the response container if the device skipped the data phase.
    fn receive_data(
        &mut self,
        op: OperationCode,
        tx: u32,
        writer: &mut dyn Write,
        mut progress: Progress<'_>,
    ) -> Result<Option<Container>> {
        let first = self.next_container_buffer(self.config.timeouts.data)?;
        let header = ContainerHeader::parse(&first)?;
        self.check_transaction(tx, header.transaction_id)?;
        match header.kind {
            ContainerType::Data => {}
            ContainerType::Response => {
                tracing::debug!(tx, "Device skipped the data phase");
                let timeout = self.config.timeouts.response;
                return Ok(Some(self.complete_container(first, timeout)?));
            }
            kind => return Err(ProtocolError::UnexpectedContainer(kind.as_str()).into()),
        }
        if header.code != op.0 {
            return Err(ProtocolError::UnexpectedCode {
                expected: op.0,
                actual: header.code,
            }
            .into());
        }
        tracing::debug!(
            kind = "data",
            code = header.code,
            tx,
            len = header.length,
            "Received container"
        );

        let expected = header.payload_len();
        let mut received = 0u64;
        let mut buf = first;
        let mut offset = HEADER_SIZE;
        loop {
            let short_packet = buf.len() % self.max_packet_size != 0;
            let chunk = &buf[offset..];
            let take = match expected {
                Some(len) => chunk.len().min(usize::try_from(len - received).unwrap_or(usize::MAX)),
                None => chunk.len(),
            };
            writer.write_all(&chunk[..take])?;
            received += take as u64;
            if take < chunk.len() {
                // the next container arrived in the same transfer
                self.pending = Some(chunk[take..].to_vec());
            }
            if let Some(cb) = progress.as_mut() {
                cb(received);
            }

            let done = match expected {
                Some(len) => received >= len,
                None => short_packet,
            };
            if done {
                break;
            }

            self.check_cancel()?;
            buf = self.receive(self.config.timeouts.data)?;
            offset = 0;
            tracing::trace!(len = buf.len(), received, "Received data chunk");
            if buf.is_empty() {
                if expected.is_some() {
                    return Err(ProtocolError::MalformedContainer("data phase ended early").into());
                }
                break;
            }
        }
        writer.flush()?;
        Ok(None)
    }

    /// Bring the endpoints back to a usable state after a cancelled transaction
    fn recover_from_abort(&mut self, tx: u32) {
        tracing::warn!(tx, "Transaction aborted; clearing endpoints");
        self.pending = None;
        for direction in [Direction::Out, Direction::In] {
            if let Err(e) = self.transport.clear_halt(direction) {
                tracing::warn!("Failed to clear {} halt after abort: {}", direction, e);
            }
        }
        self.cancel.reset();

        let deadline = Instant::now() + self.config.drain_timeout;
        let mut drained = 0usize;
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            if left.is_zero() {
                break;
            }
            match self.transport.receive(self.chunk_size, left, &self.cancel) {
                Ok(buf) => drained += buf.len(),
                Err(_) => break,
            }
        }
        if drained > 0 {
            tracing::debug!(drained, "Discarded stale inbound data");
        }
    }
}

/// Read exactly `len` bytes from `reader`, appending to `buf`
fn fill_exact(reader: &mut dyn Read, buf: &mut Vec<u8>, len: u64) -> Result<()> {
    let read = (&mut *reader).take(len).read_to_end(buf)?;
    if (read as u64) < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("object source ended after {read} of {len} bytes"),
        )
        .into());
    }
    Ok(())
}
