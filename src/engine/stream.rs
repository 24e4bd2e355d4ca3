use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::error::{CalloutError, CalloutResult, ExecutionError};
use crate::output::EngineOutput;

/// Stream of engine output published by a `TriggerRuntime`.
///
/// The stream disconnects once the runtime has shut down and every buffered
/// output has been received.
#[derive(Debug)]
pub struct AlertStream {
    rx: Receiver<EngineOutput>,
}

impl AlertStream {
    pub(crate) const fn new(rx: Receiver<EngineOutput>) -> Self {
        Self { rx }
    }

    /// Receive the next output (blocking).
    ///
    /// # Errors
    ///
    /// Returns `Disconnected` once the runtime is gone.
    pub fn recv(&self) -> CalloutResult<EngineOutput> {
        self.rx.recv().map_err(|_| disconnected())
    }

    /// Receive the next output with a timeout.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if nothing arrives in time and `Disconnected` once
    /// the runtime is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> CalloutResult<EngineOutput> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => CalloutError::Execution(ExecutionError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            }),
            RecvTimeoutError::Disconnected => disconnected(),
        })
    }

    /// Receive an output if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns `Disconnected` once the runtime is gone and the buffer is drained.
    pub fn try_recv(&self) -> CalloutResult<Option<EngineOutput>> {
        match self.rx.try_recv() {
            Ok(output) => Ok(Some(output)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(disconnected()),
        }
    }

    /// Number of buffered outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns true if no output is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

fn disconnected() -> CalloutError {
    CalloutError::Execution(ExecutionError::Disconnected {
        path: "alert_stream".to_string(),
    })
}
