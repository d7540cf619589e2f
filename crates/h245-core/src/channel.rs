//! Media transport channel lifecycle contract
//!
//! A [`LogicalChannel`](crate::LogicalChannel) exclusively owns one
//! [`MediaChannel`] for as long as the channel exists. The negotiation code
//! only drives its lifecycle and lets it fill in transport fields of the
//! signalling messages; socket I/O, jitter buffering and RTP/RTCP live in the
//! implementation (typically an rtp-core session).

use crate::protocol::{ChannelDirection, ChannelNumber, OpenLogicalChannel, OpenLogicalChannelAck};

/// Transport side of a logical channel
pub trait MediaChannel: Send {
    fn number(&self) -> ChannelNumber;

    /// Bind the channel to the number its logical channel was given
    fn set_number(&mut self, number: ChannelNumber);

    fn direction(&self) -> ChannelDirection;

    fn session_id(&self) -> u32;

    /// Allocate transport resources before the OpenLogicalChannel is sent
    fn open(&mut self) -> bool;

    /// Reserve the bandwidth the channel needs
    fn set_initial_bandwidth(&mut self) -> bool {
        true
    }

    /// Begin media flow
    fn start(&mut self) -> bool;

    /// Called exactly once before the channel is dropped
    fn cleanup_on_termination(&mut self);

    /// Add transport fields (media control address, payload type, ...) to an outgoing open
    fn on_sending_open(&self, _open: &mut OpenLogicalChannel) -> bool {
        true
    }

    /// Add transport fields to the ack for a remote open
    fn on_sending_open_ack(&self, _open: &OpenLogicalChannel, _ack: &mut OpenLogicalChannelAck) {}

    /// Consume the remote's transport fields from an ack
    fn on_received_open_ack(&mut self, _ack: &OpenLogicalChannelAck) -> bool {
        true
    }
}
