//! Error types for FINS communication and the tag layer.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for FINS operations.
pub type Result<T> = std::result::Result<T, FinsError>;

/// Response field that failed the request/response echo check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoField {
    /// Main request code (function) did not match.
    Command,
    /// Sub request code (sub-function) did not match.
    SubCommand,
    /// Service ID did not match.
    ServiceId,
}

impl std::fmt::Display for EchoField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EchoField::Command => write!(f, "command"),
            EchoField::SubCommand => write!(f, "sub-command"),
            EchoField::ServiceId => write!(f, "service ID"),
        }
    }
}

/// Errors that can occur during FINS communication or tag polling.
///
/// The enum is `Clone` so errors can flow through broadcast streams; the
/// underlying I/O cause is held behind an `Arc` for that reason.
#[derive(Debug, Clone, Error)]
pub enum FinsError {
    /// Connection parameter out of range at construction.
    #[error("invalid configuration: {reason}")]
    ConfigInvalid {
        /// Description of the invalid parameter.
        reason: String,
    },

    /// Read or write invoked before the session was initialized.
    #[error("session not initialized")]
    NotInitialized,

    /// Tag address string unparsable or semantically impossible.
    #[error("invalid address '{address}': {reason}")]
    AddressInvalid {
        /// The offending address string.
        address: String,
        /// Description of the addressing error.
        reason: String,
    },

    /// Address plus length exceeds the capability table, or the area is
    /// unsupported for the detected model.
    #[error("range error: {reason}")]
    RangeInvalid {
        /// Description of the range violation.
        reason: String,
    },

    /// Socket-level error, wrapping the underlying cause.
    #[error("transport error: {0}")]
    Transport(#[source] Arc<io::Error>),

    /// Operation did not complete within the configured deadline.
    #[error("communication timeout")]
    Timeout,

    /// Underlying socket was disposed (race with shutdown).
    #[error("channel closed")]
    ChannelClosed,

    /// TCP magic or length invalid, truncated header, or invalid FINS
    /// header start byte.
    #[error("framing error: {reason}")]
    ProtocolFraming {
        /// Description of the framing violation.
        reason: String,
    },

    /// Function, sub-function, or service ID in the response did not match
    /// the request.
    #[error("{field} echo mismatch: expected 0x{expected:02X}, received 0x{received:02X}")]
    ProtocolEcho {
        /// Which echoed field mismatched.
        field: EchoField,
        /// Value sent in the request.
        expected: u8,
        /// Value received in the response.
        received: u8,
    },

    /// Top bit of the response code was set.
    #[error("network relay error")]
    NetworkRelay,

    /// Non-zero FINS end code reported by the PLC.
    #[error("FINS error (main 0x{main:02X}, sub 0x{sub:02X}): {message}")]
    Fins {
        /// Main response code (bits 0-6 of end-code byte 0).
        main: u8,
        /// Sub response code (bits 0-5 of end-code byte 1).
        sub: u8,
        /// Canonical message for the code pair.
        message: String,
    },

    /// Cached value requested with an incompatible type parameter.
    #[error("type mismatch for tag '{tag}'")]
    TypeMismatch {
        /// Name of the tag.
        tag: String,
    },

    /// Operation rejected by the capability table.
    #[error("unsupported operation: {reason}")]
    Unsupported {
        /// Description of the rejection.
        reason: String,
    },

    /// BCD byte array length outside 1-4 or not matching the requested width.
    #[error("BCD width must be 1-4 bytes, got {len}")]
    BadBcdWidth {
        /// Offending byte count.
        len: usize,
    },
}

impl FinsError {
    /// Creates a new `ConfigInvalid` error.
    pub fn config_invalid(reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            reason: reason.into(),
        }
    }

    /// Creates a new `AddressInvalid` error.
    pub fn address_invalid(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AddressInvalid {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `RangeInvalid` error.
    pub fn range_invalid(reason: impl Into<String>) -> Self {
        Self::RangeInvalid {
            reason: reason.into(),
        }
    }

    /// Creates a new `ProtocolFraming` error.
    pub fn framing(reason: impl Into<String>) -> Self {
        Self::ProtocolFraming {
            reason: reason.into(),
        }
    }

    /// Creates a new `ProtocolEcho` error.
    pub fn echo_mismatch(field: EchoField, expected: u8, received: u8) -> Self {
        Self::ProtocolEcho {
            field,
            expected,
            received,
        }
    }

    /// Creates a new `Fins` error with the canonical message for the codes.
    pub fn fins(main: u8, sub: u8) -> Self {
        Self::Fins {
            main,
            sub,
            message: end_code_message(main, sub),
        }
    }

    /// Creates a new `Unsupported` error.
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }

    /// Returns whether the service ID echo failed, which obligates the
    /// channel to purge its receive buffer.
    pub fn is_sid_mismatch(&self) -> bool {
        matches!(
            self,
            FinsError::ProtocolEcho {
                field: EchoField::ServiceId,
                ..
            }
        )
    }

    /// Returns whether the channel may tear down, rebuild, and retry after
    /// this error. Protocol-level errors report a PLC-side problem and are
    /// never retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FinsError::Transport(_)
                | FinsError::Timeout
                | FinsError::ChannelClosed
                | FinsError::ProtocolFraming { .. }
        )
    }
}

impl From<io::Error> for FinsError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => FinsError::Timeout,
            io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe => FinsError::ChannelClosed,
            _ => FinsError::Transport(Arc::new(err)),
        }
    }
}

/// Returns the canonical message for a FINS end-code pair.
///
/// Covers the published table for main codes `0x00`-`0x24`; unlisted sub
/// codes fall back to a generic message carrying the main-code meaning.
pub fn end_code_message(main: u8, sub: u8) -> String {
    let known = match (main, sub) {
        (0x00, 0x01) => Some("service was canceled"),
        (0x01, 0x01) => Some("local node not in network"),
        (0x01, 0x02) => Some("token timeout, node address too large"),
        (0x01, 0x03) => Some("send retries failed"),
        (0x01, 0x04) => Some("maximum number of event frames exceeded"),
        (0x01, 0x05) => Some("node address out of range"),
        (0x01, 0x06) => Some("duplicate node address"),
        (0x02, 0x01) => Some("destination node not in network"),
        (0x02, 0x02) => Some("no node with the specified unit address"),
        (0x02, 0x03) => Some("third node not in network"),
        (0x02, 0x04) => Some("destination node busy"),
        (0x02, 0x05) => Some("response timeout"),
        (0x03, 0x01) => Some("communications controller error"),
        (0x03, 0x02) => Some("CPU unit error"),
        (0x03, 0x03) => Some("controller board error"),
        (0x03, 0x04) => Some("unit number error"),
        (0x04, 0x01) => Some("undefined command"),
        (0x04, 0x02) => Some("command not supported by model or version"),
        (0x05, 0x01) => Some("destination address setting error"),
        (0x05, 0x02) => Some("no routing tables"),
        (0x05, 0x03) => Some("routing table error"),
        (0x05, 0x04) => Some("maximum relay count exceeded"),
        (0x10, 0x01) => Some("command is too long"),
        (0x10, 0x02) => Some("command is too short"),
        (0x10, 0x03) => Some("element count does not match data length"),
        (0x10, 0x04) => Some("command format error"),
        (0x10, 0x05) => Some("header error"),
        (0x11, 0x01) => Some("area classification missing"),
        (0x11, 0x02) => Some("access size error"),
        (0x11, 0x03) => Some("address range error"),
        (0x11, 0x04) => Some("address range exceeded"),
        (0x11, 0x06) => Some("program missing"),
        (0x11, 0x09) => Some("relational error"),
        (0x11, 0x0A) => Some("duplicate data access"),
        (0x11, 0x0B) => Some("response too long"),
        (0x11, 0x0C) => Some("parameter error"),
        (0x20, 0x02) => Some("read not possible, area protected"),
        (0x20, 0x03) => Some("read not possible, table missing"),
        (0x20, 0x04) => Some("read not possible, data missing"),
        (0x20, 0x05) => Some("read not possible, program missing"),
        (0x20, 0x06) => Some("read not possible, file missing"),
        (0x20, 0x07) => Some("read not possible, data mismatch"),
        (0x21, 0x01) => Some("write not possible, area read-only"),
        (0x21, 0x02) => Some("write not possible, area protected"),
        (0x21, 0x03) => Some("write not possible, cannot register"),
        (0x21, 0x05) => Some("write not possible, program missing"),
        (0x21, 0x06) => Some("write not possible, file missing"),
        (0x21, 0x07) => Some("write not possible, file name already exists"),
        (0x21, 0x08) => Some("write not possible, cannot change"),
        (0x22, 0x01) => Some("not possible during execution"),
        (0x22, 0x02) => Some("not possible while running"),
        (0x22, 0x03) => Some("wrong mode, PLC is in PROGRAM mode"),
        (0x22, 0x04) => Some("wrong mode, PLC is in DEBUG mode"),
        (0x22, 0x05) => Some("wrong mode, PLC is in MONITOR mode"),
        (0x22, 0x06) => Some("wrong mode, PLC is in RUN mode"),
        (0x22, 0x07) => Some("specified node is not the polling node"),
        (0x22, 0x08) => Some("step cannot be executed"),
        (0x23, 0x01) => Some("file device missing"),
        (0x23, 0x02) => Some("memory missing"),
        (0x23, 0x03) => Some("clock missing"),
        (0x24, 0x01) => Some("cannot start/stop, table missing"),
        _ => None,
    };
    match known {
        Some(msg) => msg.to_string(),
        None => {
            let group = match main {
                0x01 => "local node error",
                0x02 => "destination node error",
                0x03 => "controller error",
                0x04 => "service unsupported",
                0x05 => "routing table error",
                0x10 => "command format error",
                0x11 => "parameter error",
                0x20 => "read not possible",
                0x21 => "write not possible",
                0x22 => "operating mode conflict",
                0x23 => "no such device",
                0x24 => "cannot start/stop",
                _ => "unknown error",
            };
            format!("{} (unlisted sub code)", group)
        }
    }
}
