//! Scripted transport for unit tests.
//!
//! `ScriptedTransport` replays a queue of inbound buffers (or errors) and
//! records everything the engine sends. The matching [`ScriptHandle`] stays
//! with the test after the transport has been boxed into a session, so the
//! test can keep feeding it and inspect call counts afterwards.

use crate::cancel::CancelToken;
use crate::transport::{
    ControlChannel, Direction, Transport, TransportError, TransportResult, TransportStats,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct Script {
    inbound: VecDeque<TransportResult<Vec<u8>>>,
    send_errors: VecDeque<TransportError>,
    sent: Vec<Vec<u8>>,
    send_calls: usize,
    receive_calls: usize,
    halts_cleared: Vec<Direction>,
    abort_requests: Vec<u32>,
    stats: TransportStats,
}

fn lock(script: &Mutex<Script>) -> MutexGuard<'_, Script> {
    script.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transport that replays scripted inbound traffic
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
    max_packet_size: usize,
}

/// Test-side view of a [`ScriptedTransport`]
#[derive(Clone)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
}

struct ScriptedControl {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    /// Create a transport and the handle that scripts it
    #[must_use]
    pub fn new(max_packet_size: usize) -> (Self, ScriptHandle) {
        let script = Arc::new(Mutex::new(Script::default()));
        let transport = Self {
            script: Arc::clone(&script),
            max_packet_size,
        };
        (transport, ScriptHandle { script })
    }
}

impl ScriptHandle {
    /// Queue a buffer for the next `receive`
    pub fn push_inbound(&self, buf: Vec<u8>) {
        lock(&self.script).inbound.push_back(Ok(buf));
    }

    /// Queue an error for the next `receive`
    pub fn push_inbound_error(&self, err: TransportError) {
        lock(&self.script).inbound.push_back(Err(err));
    }

    /// Make the next `send` fail with `err`
    pub fn fail_next_send(&self, err: TransportError) {
        lock(&self.script).send_errors.push_back(err);
    }

    /// Every buffer successfully sent so far
    #[must_use]
    pub fn sent(&self) -> Vec<Vec<u8>> {
        lock(&self.script).sent.clone()
    }

    /// Number of `send` calls, including failed ones
    #[must_use]
    pub fn send_calls(&self) -> usize {
        lock(&self.script).send_calls
    }

    /// Number of `receive` calls, including failed ones
    #[must_use]
    pub fn receive_calls(&self) -> usize {
        lock(&self.script).receive_calls
    }

    /// Endpoints on which a halt was cleared, in order
    #[must_use]
    pub fn halts_cleared(&self) -> Vec<Direction> {
        lock(&self.script).halts_cleared.clone()
    }

    /// Transaction ids passed to the control channel
    #[must_use]
    pub fn abort_requests(&self) -> Vec<u32> {
        lock(&self.script).abort_requests.clone()
    }

    /// Inbound buffers not consumed yet
    #[must_use]
    pub fn pending_inbound(&self) -> usize {
        lock(&self.script).inbound.len()
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &mut self,
        buf: &[u8],
        _timeout: Duration,
        cancel: &CancelToken,
    ) -> TransportResult<()> {
        let mut script = lock(&self.script);
        script.send_calls += 1;
        if cancel.is_cancelled() {
            script.stats.record_error(Direction::Out, &TransportError::Aborted);
            return Err(TransportError::Aborted);
        }
        if let Some(err) = script.send_errors.pop_front() {
            script.stats.record_error(Direction::Out, &err);
            return Err(err);
        }
        script.stats.record_transfer(Direction::Out, buf.len());
        script.sent.push(buf.to_vec());
        Ok(())
    }

    fn receive(
        &mut self,
        max_len: usize,
        _timeout: Duration,
        cancel: &CancelToken,
    ) -> TransportResult<Vec<u8>> {
        let mut script = lock(&self.script);
        script.receive_calls += 1;
        match script.inbound.pop_front() {
            Some(Ok(mut buf)) => {
                if buf.len() > max_len {
                    let rest = buf.split_off(max_len);
                    script.inbound.push_front(Ok(rest));
                }
                script.stats.record_transfer(Direction::In, buf.len());
                Ok(buf)
            }
            Some(Err(err)) => {
                script.stats.record_error(Direction::In, &err);
                Err(err)
            }
            None if cancel.is_cancelled() => Err(TransportError::Aborted),
            None => Err(TransportError::Timeout),
        }
    }

    fn clear_halt(&mut self, direction: Direction) -> TransportResult<()> {
        lock(&self.script).halts_cleared.push(direction);
        Ok(())
    }

    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn control(&self) -> Arc<dyn ControlChannel> {
        Arc::new(ScriptedControl {
            script: Arc::clone(&self.script),
        })
    }

    fn stats(&self) -> TransportStats {
        lock(&self.script).stats.clone()
    }
}

impl ControlChannel for ScriptedControl {
    fn request_abort(&self, transaction_id: u32, _timeout: Duration) -> TransportResult<()> {
        lock(&self.script).abort_requests.push(transaction_id);
        Ok(())
    }
}
