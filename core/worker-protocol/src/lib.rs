//! Wire protocol for the download worker's local pub/sub channel.
//!
//! The worker publishes three-part messages: an opaque correlation token, a
//! decimal message type, and a UTF-8 payload. Replies go back on a separate
//! socket as two-part messages `(token, type)`. This crate owns the framing
//! rules and the message-type taxonomy so the channel loop and its tests agree
//! on them.

mod progress;

pub use progress::{DownloadProgress, PhaseProgress, DEFAULT_RATE_DISPLAY};

use std::fmt;
use std::ops::Range;

/// Port the launcher publishes replies on (the worker subscribes here).
pub const DEFAULT_EGRESS_PORT: u16 = 32568;
/// Port the launcher subscribes on (the worker publishes here).
pub const DEFAULT_INGRESS_PORT: u16 = 32569;

pub const HEARTBEAT_TYPE: u32 = 10;
pub const HEARTBEAT_PAYLOAD: &[u8] = b"heartbeat";

/// Reply type acknowledging a heartbeat.
pub const HEARTBEAT_ACK: &[u8] = b"4";
/// Reply type asking the worker to stop.
pub const STOP_SIGNAL: &[u8] = b"3";

/// Inbound types carrying a `DownloadProgress` payload.
pub const TELEMETRY_TYPES: Range<u32> = 3..9;

/// Inbound types that end the session from the worker side.
///
/// Fragile: the range is far wider than the types observed in practice, so a
/// future telemetry type >= 9 would be read as a terminal signal. Kept as-is
/// until the worker's full type catalog is known.
pub const TERMINAL_TYPES: Range<u32> = 8..2000;

const FRAME_PARTS: usize = 3;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("expected {FRAME_PARTS} frame parts, got {0}")]
    PartCount(usize),

    #[error("message type is not a decimal number: {0:?}")]
    InvalidType(String),
}

/// Opaque value tying replies to one worker instance.
///
/// Never interpreted; only compared and echoed back.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CorrelationToken(Vec<u8>);

impl CorrelationToken {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationToken({} bytes)", self.0.len())
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerMessage {
    pub token: CorrelationToken,
    pub message_type: u32,
    pub payload: Vec<u8>,
}

/// What the channel loop should do with an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disposition {
    pub heartbeat: bool,
    pub telemetry: bool,
    pub terminal: bool,
}

impl WorkerMessage {
    pub fn parse(frames: Vec<Vec<u8>>) -> Result<Self, FrameError> {
        if frames.len() != FRAME_PARTS {
            return Err(FrameError::PartCount(frames.len()));
        }

        let mut parts = frames.into_iter();
        let token = parts.next().unwrap_or_default();
        let raw_type = parts.next().unwrap_or_default();
        let payload = parts.next().unwrap_or_default();

        let type_text = std::str::from_utf8(&raw_type)
            .map_err(|_| FrameError::InvalidType(String::from_utf8_lossy(&raw_type).into_owned()))?;
        if type_text.is_empty() || !type_text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FrameError::InvalidType(type_text.to_string()));
        }
        let message_type = type_text
            .parse::<u32>()
            .map_err(|_| FrameError::InvalidType(type_text.to_string()))?;

        Ok(Self {
            token: CorrelationToken::new(token),
            message_type,
            payload,
        })
    }

    /// Classifies the message. A heartbeat is answered and nothing else; type
    /// 10 with any other payload falls through to the terminal check.
    pub fn disposition(&self) -> Disposition {
        if self.message_type == HEARTBEAT_TYPE && self.payload == HEARTBEAT_PAYLOAD {
            return Disposition {
                heartbeat: true,
                telemetry: false,
                terminal: false,
            };
        }

        Disposition {
            heartbeat: false,
            telemetry: TELEMETRY_TYPES.contains(&self.message_type),
            terminal: TERMINAL_TYPES.contains(&self.message_type),
        }
    }

    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

pub fn heartbeat_ack(token: &CorrelationToken) -> Vec<Vec<u8>> {
    vec![token.as_bytes().to_vec(), HEARTBEAT_ACK.to_vec()]
}

pub fn stop_signal(token: &CorrelationToken) -> Vec<Vec<u8>> {
    vec![token.as_bytes().to_vec(), STOP_SIGNAL.to_vec()]
}
