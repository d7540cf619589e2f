//! Decoded H.245 control messages
//!
//! These are the values the negotiation machines consume and produce. The
//! PER codec that maps them to and from bytes lives outside this crate; the
//! shapes here only carry the fields the negotiation procedures read or write.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use super::types::MasterSlaveStatus;
use crate::capability::{CapabilityDescriptor, CapabilityEntry};

/// Kind of media carried by a capability or channel
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum MediaType {
    Audio,
    Video,
    /// H.239 extended (presentation/live) video
    ExtendedVideo,
    Data,
    UserInput,
}

/// H.239 role label for extended video channels
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum VideoRole {
    Presentation,
    Live,
}

/// Media format description placed in an OpenLogicalChannel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataType {
    pub media_type: MediaType,
    pub capability_name: String,
    pub max_bit_rate: Option<u32>,
    pub role: Option<VideoRole>,
}

/// H.225.0 logical channel parameters for one direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParameters {
    pub data_type: DataType,
    pub session_id: u32,
    pub media_channel: Option<SocketAddr>,
    pub media_control_channel: Option<SocketAddr>,
    pub dynamic_payload_type: Option<u8>,
    pub silence_suppression: Option<bool>,
}

impl ChannelParameters {
    pub fn new(data_type: DataType, session_id: u32) -> Self {
        Self {
            data_type,
            session_id,
            media_channel: None,
            media_control_channel: None,
            dynamic_payload_type: None,
            silence_suppression: None,
        }
    }
}

/// OpenLogicalChannel request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenLogicalChannel {
    pub channel_number: u32,
    pub forward_parameters: ChannelParameters,
    /// Present for bidirectional channels
    pub reverse_parameters: Option<ChannelParameters>,
    /// Channel this one replaces, if any
    pub replacement_for: Option<u32>,
}

impl OpenLogicalChannel {
    pub fn is_bidirectional(&self) -> bool {
        self.reverse_parameters.is_some()
    }
}

/// OpenLogicalChannelAck with the H.225.0 ack parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenLogicalChannelAck {
    pub channel_number: u32,
    /// Reverse channel number for bidirectional channels
    pub reverse_channel_number: Option<u32>,
    pub session_id: Option<u32>,
    pub media_channel: Option<SocketAddr>,
    pub media_control_channel: Option<SocketAddr>,
    pub dynamic_payload_type: Option<u8>,
}

impl OpenLogicalChannelAck {
    pub fn new(channel_number: u32) -> Self {
        Self {
            channel_number,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum MasterSlaveRejectCause {
    IdenticalNumbers,
    Unspecified,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CapabilitySetRejectCause {
    Unspecified,
    UndefinedTableEntryUsed,
    DescriptorCapacityExceeded,
    TableEntryCapacityExceeded,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum OpenRejectCause {
    Unspecified,
    UnsuitableReverseParameters,
    DataTypeNotSupported,
    DataTypeNotAvailable,
    UnknownDataType,
    InsufficientBandwidth,
    MasterSlaveConflict,
    InvalidSessionId,
    InvalidDependentChannel,
    ReplacementForRejected,
}

/// Source of a CloseLogicalChannel
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CloseSource {
    User,
    Lcse,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum RequestCloseReason {
    Unknown,
    Normal,
    Reopen,
    ReservationFailure,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum RequestModeAckResponse {
    WillTransmitMostPreferredMode,
    WillTransmitLessPreferredMode,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum RequestModeRejectCause {
    ModeUnavailable,
    MultipointConstraint,
    RequestDenied,
}

/// One stream within a requested mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeElement {
    pub media_type: MediaType,
    pub capability_name: String,
    pub role: Option<VideoRole>,
}

impl ModeElement {
    pub fn new(media_type: MediaType, capability_name: impl Into<String>) -> Self {
        Self {
            media_type,
            capability_name: capability_name.into(),
            role: None,
        }
    }
}

/// A complete transmission mode, preferred modes first in a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeDescription {
    pub elements: Vec<ModeElement>,
}

impl ModeDescription {
    pub fn new(elements: Vec<ModeElement>) -> Self {
        Self { elements }
    }
}

/// H.225.0 multiplex capability advertised alongside a capability set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplexCapability {
    pub maximum_audio_delay_jitter: u16,
    pub receive_multipoint: bool,
    pub transmit_multipoint: bool,
    pub rtcp_video_control: bool,
}

/// TerminalCapabilitySet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalCapabilitySet {
    pub sequence_number: u8,
    pub capability_table: Vec<CapabilityEntry>,
    pub descriptors: Vec<CapabilityDescriptor>,
    pub multiplex_capability: Option<MultiplexCapability>,
}

impl TerminalCapabilitySet {
    /// An empty set signals a pause in transmission (H.245 §8.4.6)
    pub fn is_empty(&self) -> bool {
        self.capability_table.is_empty() && self.descriptors.is_empty()
    }
}

/// A decoded H.245 message relevant to the negotiation machines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum H245Message {
    MasterSlaveDetermination {
        terminal_type: u8,
        determination_number: u32,
    },
    /// `decision` is the role the sender of the ack has taken
    MasterSlaveDeterminationAck {
        decision: MasterSlaveStatus,
    },
    MasterSlaveDeterminationReject {
        cause: MasterSlaveRejectCause,
    },
    MasterSlaveDeterminationRelease,

    TerminalCapabilitySet(TerminalCapabilitySet),
    TerminalCapabilitySetAck {
        sequence_number: u8,
    },
    TerminalCapabilitySetReject {
        sequence_number: u8,
        cause: CapabilitySetRejectCause,
    },
    TerminalCapabilitySetRelease,

    OpenLogicalChannel(OpenLogicalChannel),
    OpenLogicalChannelAck(OpenLogicalChannelAck),
    OpenLogicalChannelConfirm {
        channel_number: u32,
    },
    OpenLogicalChannelReject {
        channel_number: u32,
        cause: OpenRejectCause,
    },
    CloseLogicalChannel {
        channel_number: u32,
        source: CloseSource,
    },
    CloseLogicalChannelAck {
        channel_number: u32,
    },
    RequestChannelClose {
        channel_number: u32,
        reason: RequestCloseReason,
    },
    RequestChannelCloseAck {
        channel_number: u32,
    },
    RequestChannelCloseReject {
        channel_number: u32,
    },
    RequestChannelCloseRelease {
        channel_number: u32,
    },
    /// H.239 indication that an extended video channel is now carrying media
    LogicalChannelActive {
        channel_number: u32,
    },

    RequestMode {
        sequence_number: u8,
        requested_modes: Vec<ModeDescription>,
    },
    RequestModeAck {
        sequence_number: u8,
        response: RequestModeAckResponse,
    },
    RequestModeReject {
        sequence_number: u8,
        cause: RequestModeRejectCause,
    },
    RequestModeRelease,

    RoundTripDelayRequest {
        sequence_number: u8,
    },
    RoundTripDelayResponse {
        sequence_number: u8,
    },
}

impl H245Message {
    /// Short name used in traces
    pub fn name(&self) -> &'static str {
        match self {
            H245Message::MasterSlaveDetermination { .. } => "MasterSlaveDetermination",
            H245Message::MasterSlaveDeterminationAck { .. } => "MasterSlaveDeterminationAck",
            H245Message::MasterSlaveDeterminationReject { .. } => "MasterSlaveDeterminationReject",
            H245Message::MasterSlaveDeterminationRelease => "MasterSlaveDeterminationRelease",
            H245Message::TerminalCapabilitySet(_) => "TerminalCapabilitySet",
            H245Message::TerminalCapabilitySetAck { .. } => "TerminalCapabilitySetAck",
            H245Message::TerminalCapabilitySetReject { .. } => "TerminalCapabilitySetReject",
            H245Message::TerminalCapabilitySetRelease => "TerminalCapabilitySetRelease",
            H245Message::OpenLogicalChannel(_) => "OpenLogicalChannel",
            H245Message::OpenLogicalChannelAck(_) => "OpenLogicalChannelAck",
            H245Message::OpenLogicalChannelConfirm { .. } => "OpenLogicalChannelConfirm",
            H245Message::OpenLogicalChannelReject { .. } => "OpenLogicalChannelReject",
            H245Message::CloseLogicalChannel { .. } => "CloseLogicalChannel",
            H245Message::CloseLogicalChannelAck { .. } => "CloseLogicalChannelAck",
            H245Message::RequestChannelClose { .. } => "RequestChannelClose",
            H245Message::RequestChannelCloseAck { .. } => "RequestChannelCloseAck",
            H245Message::RequestChannelCloseReject { .. } => "RequestChannelCloseReject",
            H245Message::RequestChannelCloseRelease { .. } => "RequestChannelCloseRelease",
            H245Message::LogicalChannelActive { .. } => "LogicalChannelActive",
            H245Message::RequestMode { .. } => "RequestMode",
            H245Message::RequestModeAck { .. } => "RequestModeAck",
            H245Message::RequestModeReject { .. } => "RequestModeReject",
            H245Message::RequestModeRelease => "RequestModeRelease",
            H245Message::RoundTripDelayRequest { .. } => "RoundTripDelayRequest",
            H245Message::RoundTripDelayResponse { .. } => "RoundTripDelayResponse",
        }
    }

    /// Logical channel number carried by channel signalling messages
    pub fn channel_number(&self) -> Option<u32> {
        match self {
            H245Message::OpenLogicalChannel(open) => Some(open.channel_number),
            H245Message::OpenLogicalChannelAck(ack) => Some(ack.channel_number),
            H245Message::OpenLogicalChannelConfirm { channel_number }
            | H245Message::OpenLogicalChannelReject { channel_number, .. }
            | H245Message::CloseLogicalChannel { channel_number, .. }
            | H245Message::CloseLogicalChannelAck { channel_number }
            | H245Message::RequestChannelClose { channel_number, .. }
            | H245Message::RequestChannelCloseAck { channel_number }
            | H245Message::RequestChannelCloseReject { channel_number }
            | H245Message::RequestChannelCloseRelease { channel_number }
            | H245Message::LogicalChannelActive { channel_number } => Some(*channel_number),
            _ => None,
        }
    }
}

impl fmt::Display for H245Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.channel_number() {
            Some(number) => write!(f, "{} channel={}", self.name(), number),
            None => f.write_str(self.name()),
        }
    }
}
