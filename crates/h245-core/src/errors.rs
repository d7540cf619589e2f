//! Error types for h245-core
//!
//! Conditions fall into a few categories:
//!
//! - **Ignorable**: duplicates, stale sequence numbers and messages arriving in
//!   an incompatible state. These never surface as errors.
//! - **Fatal**: retries exceeded, outright rejects, decision mismatches and
//!   timeouts. They are reported through
//!   [`ControlConnection::report_protocol_error`](crate::ControlConnection::report_protocol_error)
//!   and only become an [`H245Error::Protocol`] when the connection vetoes
//!   further processing.
//! - **Transport**: the control connection could not take an outgoing message.
//! - **Local**: an application call that cannot be honoured in the current state.

use std::fmt;

use thiserror::Error;

use crate::protocol::ChannelNumber;

/// Result type for negotiation operations
pub type H245Result<T> = Result<T, H245Error>;

/// The negotiation procedure that raised a protocol error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolErrorKind {
    /// Master/slave determination (H.245 §8.2)
    MasterSlaveDetermination,
    /// Terminal capability exchange (H.245 §8.3)
    CapabilityExchange,
    /// Logical channel signalling (H.245 §8.4)
    LogicalChannel,
    /// Mode request (H.245 §8.9)
    RequestMode,
    /// Round trip delay measurement
    RoundTripDelay,
}

impl fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolErrorKind::MasterSlaveDetermination => "MasterSlaveDetermination",
            ProtocolErrorKind::CapabilityExchange => "CapabilityExchange",
            ProtocolErrorKind::LogicalChannel => "LogicalChannel",
            ProtocolErrorKind::RequestMode => "RequestMode",
            ProtocolErrorKind::RoundTripDelay => "RoundTripDelay",
        };
        f.write_str(name)
    }
}

/// Failure to hand an outgoing message to the control connection
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The control connection has been closed
    #[error("control connection closed")]
    Closed,

    /// Writing to the connection failed
    #[error("control connection write failed: {message}")]
    WriteFailed { message: String },
}

impl TransportError {
    /// Create a write failure
    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

/// Errors returned by the negotiation state machines
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum H245Error {
    /// Outgoing message could not be written
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Fatal protocol condition after which the connection asked to stop processing
    #[error("{kind} protocol error: {reason}")]
    Protocol {
        kind: ProtocolErrorKind,
        reason: String,
    },

    /// Operation is not valid in the machine's current state
    #[error("invalid state for {operation}: {state}")]
    InvalidState { operation: String, state: String },

    /// Opening a logical channel failed before anything was sent
    #[error("failed to open logical channel {channel}: {reason}")]
    ChannelOpenFailed {
        channel: ChannelNumber,
        reason: String,
    },

    /// No logical channel is registered under this number
    #[error("unknown logical channel {0}")]
    UnknownChannel(ChannelNumber),

    /// A request is already outstanding
    #[error("{0} request already outstanding")]
    RequestPending(ProtocolErrorKind),

    /// Configuration is unusable
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl H245Error {
    /// Create a protocol error
    pub fn protocol(kind: ProtocolErrorKind, reason: impl Into<String>) -> Self {
        Self::Protocol {
            kind,
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(operation: impl Into<String>, state: impl fmt::Debug) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: format!("{:?}", state),
        }
    }

    /// Create a channel open failure
    pub fn open_failed(channel: ChannelNumber, reason: impl Into<String>) -> Self {
        Self::ChannelOpenFailed {
            channel,
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether the connection should stop processing the call after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, H245Error::Protocol { .. } | H245Error::Transport(_))
    }
}
