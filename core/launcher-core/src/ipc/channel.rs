//! Control loop for the worker channel.
//!
//! One loop runs per session on its own thread and owns the transport. It
//! shares exactly three things with the supervisor, all in `ChannelState`:
//!
//! - `stop_requested`: written by `Supervisor::stop`, consumed by the loop.
//! - `shutdown`: written when the worker process has exited.
//! - the last correlation token: written by the loop, read by the stop path.
//!
//! ## Message handling
//!
//! ```text
//! (token, "10", "heartbeat")  → reply (token, "4")
//! (token, 3..=8, json)        → decode DownloadProgress, notify observer
//! (token, 8..2000, _)         → reply (token, "3") twice, exit
//! (token, non-numeric, _)     → record token, discard
//! not 3 parts                 → discard
//! ```
//!
//! The token is recorded from every 3-part frame before its type is parsed,
//! so a stop can use the handshake as soon as the worker has spoken at all.
//!
//! The stop frame is always sent twice; the loopback pub/sub transport may
//! drop a message published before the worker's subscription settles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dlworker_protocol::{
    heartbeat_ack, stop_signal, CorrelationToken, DownloadProgress, WorkerMessage,
};

use super::transport::Transport;
use crate::error::Result;
use crate::observer::ProgressObserver;

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Flags and the last-seen token shared between a session's loop and its
/// supervisor.
#[derive(Debug, Default)]
pub struct ChannelState {
    stop_requested: AtomicBool,
    shutdown: AtomicBool,
    token: Mutex<Option<CorrelationToken>>,
}

impl ChannelState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn token(&self) -> Option<CorrelationToken> {
        self.token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn has_token(&self) -> bool {
        self.token().is_some()
    }

    fn record_token(&self, token: &CorrelationToken) {
        let mut slot = self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.as_ref() != Some(token) {
            *slot = Some(token.clone());
        }
    }

    fn take_stop_request(&self) -> bool {
        self.stop_requested.swap(false, Ordering::SeqCst)
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Why the loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelExit {
    /// Stop was requested locally and the stop frames were sent.
    StopRequested,
    /// The worker sent a message type in the terminal range.
    WorkerTerminal { message_type: u32 },
    /// The session ended (worker exited) without a protocol-level stop.
    Shutdown,
    TransportError(String),
}

pub struct ChannelLoop {
    transport: Box<dyn Transport>,
    state: Arc<ChannelState>,
    observer: Arc<dyn ProgressObserver>,
    poll_timeout: Duration,
}

impl ChannelLoop {
    pub fn new(
        transport: Box<dyn Transport>,
        state: Arc<ChannelState>,
        observer: Arc<dyn ProgressObserver>,
    ) -> Self {
        Self {
            transport,
            state,
            observer,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Runs until stop, a terminal message, shutdown, or a transport error.
    /// The transport is closed on every exit.
    pub fn run(mut self) -> ChannelExit {
        let exit = self.poll_until_exit();
        self.transport.close();
        match &exit {
            ChannelExit::TransportError(err) => {
                tracing::warn!(error = %err, "IPC channel stopped on transport error")
            }
            other => tracing::info!(exit = ?other, "IPC channel stopped"),
        }
        exit
    }

    fn poll_until_exit(&mut self) -> ChannelExit {
        loop {
            if self.state.take_stop_request() {
                match self.state.token() {
                    Some(token) => {
                        if let Err(err) = self.send_stop(&token) {
                            return ChannelExit::TransportError(err.to_string());
                        }
                        tracing::info!("Sent stop signal to worker");
                        return ChannelExit::StopRequested;
                    }
                    None => tracing::debug!("Stop requested before any worker message; ignoring"),
                }
            }

            if self.state.is_shutdown() {
                return ChannelExit::Shutdown;
            }

            let frames = match self.transport.recv_timeout(self.poll_timeout) {
                Ok(Some(frames)) => frames,
                Ok(None) => continue,
                Err(err) => return ChannelExit::TransportError(err.to_string()),
            };

            match self.handle_frames(frames) {
                Ok(Some(exit)) => return exit,
                Ok(None) => {}
                Err(err) => return ChannelExit::TransportError(err.to_string()),
            }
        }
    }

    fn handle_frames(&mut self, frames: Vec<Vec<u8>>) -> Result<Option<ChannelExit>> {
        // Any 3-part frame identifies the worker, even one whose type is unusable.
        if let [token, _, _] = frames.as_slice() {
            self.state.record_token(&CorrelationToken::new(token.clone()));
        }

        let message = match WorkerMessage::parse(frames) {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(error = %err, "Discarding malformed worker message");
                return Ok(None);
            }
        };

        let disposition = message.disposition();

        if disposition.heartbeat {
            self.transport.send(heartbeat_ack(&message.token))?;
            return Ok(None);
        }

        if disposition.telemetry {
            match DownloadProgress::decode(&message.payload) {
                Ok(progress) => self.observer.on_progress(&progress),
                Err(err) => tracing::warn!(
                    error = %err,
                    message_type = message.message_type,
                    "Discarding undecodable progress payload"
                ),
            }
        }

        if disposition.terminal {
            self.send_stop(&message.token)?;
            tracing::info!(
                message_type = message.message_type,
                "Worker signalled end of session"
            );
            return Ok(Some(ChannelExit::WorkerTerminal {
                message_type: message.message_type,
            }));
        }

        Ok(None)
    }

    fn send_stop(&mut self, token: &CorrelationToken) -> Result<()> {
        self.transport.send(stop_signal(token))?;
        self.transport.send(stop_signal(token))
    }
}
