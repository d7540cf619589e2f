//! Connection Integration Trait
//!
//! The negotiation machines never own the call. Everything they need from
//! the surrounding H.323 connection goes through [`ControlConnection`]:
//! writing control messages, reporting protocol errors, creating media
//! channels and taking the policy decisions H.245 leaves to the endpoint.
//!
//! Decision hooks are synchronous and may be called while a machine holds its
//! lock. They must not call back into the machine that invoked them, nor query
//! the logical channel registry.

use std::time::Duration;

use async_trait::async_trait;

use crate::capability::{Capability, RemoteCapabilitySet};
use crate::channel::MediaChannel;
use crate::errors::{ProtocolErrorKind, TransportError};
use crate::protocol::{
    CapabilitySetRejectCause, ChannelDirection, ChannelNumber, ChannelParameters, H245Message,
    ModeDescription, OpenLogicalChannel, OpenRejectCause, RequestCloseReason,
    RequestModeAckResponse, RequestModeRejectCause,
};

/// Verdict on a received capability set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityVerdict {
    Accept,
    Reject(CapabilitySetRejectCause),
}

/// Choice among the modes of a received RequestMode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSelection {
    /// Index into the requested modes; 0 is the most preferred
    Accept(usize),
    Reject(RequestModeRejectCause),
}

/// Why the negotiation layer asked for the call to be cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEndReason {
    /// Our capability set arbitration rejected the remote's set
    CapabilityExchange(CapabilitySetRejectCause),
}

/// A channel that could not start because of a master/slave conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConflict {
    pub number: ChannelNumber,
    pub session_id: u32,
    pub direction: ChannelDirection,
}

/// Services the surrounding connection provides to the negotiation machines
#[async_trait]
pub trait ControlConnection: Send + Sync {
    /// Encode and write a message on the control channel
    async fn write_control_message(&self, message: H245Message) -> Result<(), TransportError>;

    /// Report a condition the machine could not resolve itself
    ///
    /// Returning `false` vetoes further processing, e.g. because the call is
    /// already being cleared.
    fn report_protocol_error(&self, kind: ProtocolErrorKind, reason: &str) -> bool;

    /// Create the receiving side of a channel the remote asked to open
    fn create_logical_channel(
        &self,
        open: &OpenLogicalChannel,
        number: ChannelNumber,
    ) -> Result<Box<dyn MediaChannel>, OpenRejectCause>;

    /// Create the transmitting side of a channel we are opening
    fn create_realtime_channel(
        &self,
        capability: &dyn Capability,
        direction: ChannelDirection,
        session_id: u32,
        parameters: Option<&ChannelParameters>,
    ) -> Option<Box<dyn MediaChannel>>;

    /// Decide whether the remote's capability set is acceptable
    fn arbitrate_capability_set(&self, remote: &RemoteCapabilitySet) -> CapabilityVerdict;

    /// Pick one of the requested transmission modes
    fn choose_request_mode(&self, modes: &[ModeDescription]) -> ModeSelection;

    /// Resolve a channel conflict, usually by closing our own channel in the session
    ///
    /// Called with no machine lock held, so it may close channels itself.
    fn resolve_channel_conflict(&self, conflict: &ChannelConflict);

    /// Whether the remote may close one of our channels right now
    fn accept_close_request(&self, _number: ChannelNumber, _reason: RequestCloseReason) -> bool {
        true
    }

    /// Clear the call
    fn clear_call(&self, _reason: CallEndReason) {}

    /// We agreed to transmit `mode` at the remote's request
    fn on_mode_changed(&self, _mode: &ModeDescription) {}

    /// The remote accepted a mode we requested from it
    fn on_request_mode_accepted(&self, _response: RequestModeAckResponse) {}

    /// `None` when the request timed out or was released without a cause
    fn on_request_mode_refused(&self, _cause: Option<RequestModeRejectCause>) {}

    fn on_round_trip_delay(&self, _delay: Duration) {}

    /// Product name the remote reported during call setup
    fn remote_application(&self) -> String {
        String::new()
    }
}
