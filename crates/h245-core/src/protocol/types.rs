//! Identifiers and counters shared by the negotiation machines

use std::fmt;

use serde::{Deserialize, Serialize};

/// Mask applied to master/slave determination numbers (24 bits)
pub const DETERMINATION_NUMBER_MASK: u32 = 0x00FF_FFFF;

/// Half of the determination number space; a modulo difference equal to this is a tie
pub const DETERMINATION_HALF_RANGE: u32 = 0x0080_0000;

/// Which side initiated a logical channel
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Origin {
    /// Opened by this endpoint (we transmit)
    Local,
    /// Opened by the remote endpoint (we receive)
    Remote,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => f.write_str("local"),
            Origin::Remote => f.write_str("remote"),
        }
    }
}

/// Logical channel number scoped by origin
///
/// The wire only carries the numeric id. Both endpoints allocate ids
/// independently, so the same id may exist once for each origin.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChannelNumber {
    pub id: u32,
    pub origin: Origin,
}

impl ChannelNumber {
    pub fn new(id: u32, origin: Origin) -> Self {
        Self { id, origin }
    }

    /// Number of a channel we opened
    pub fn local(id: u32) -> Self {
        Self::new(id, Origin::Local)
    }

    /// Number of a channel the remote opened
    pub fn remote(id: u32) -> Self {
        Self::new(id, Origin::Remote)
    }

    pub fn is_from_remote(&self) -> bool {
        self.origin == Origin::Remote
    }
}

impl fmt::Display for ChannelNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.id, self.origin)
    }
}

/// Direction of a logical channel as seen from this endpoint
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChannelDirection {
    /// Unidirectional, we send
    Transmitter,
    /// Unidirectional, we receive
    Receiver,
    /// Both directions on one channel number (e.g. T.120 data)
    Bidirectional,
}

/// Outcome of master/slave determination
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum MasterSlaveStatus {
    Indeterminate,
    Master,
    Slave,
}

impl MasterSlaveStatus {
    /// The role the other endpoint takes when we hold this one
    pub fn opposite(self) -> Self {
        match self {
            MasterSlaveStatus::Master => MasterSlaveStatus::Slave,
            MasterSlaveStatus::Slave => MasterSlaveStatus::Master,
            MasterSlaveStatus::Indeterminate => MasterSlaveStatus::Indeterminate,
        }
    }
}

impl fmt::Display for MasterSlaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MasterSlaveStatus::Indeterminate => "indeterminate",
            MasterSlaveStatus::Master => "master",
            MasterSlaveStatus::Slave => "slave",
        };
        f.write_str(name)
    }
}

/// Advance an 8-bit H.245 sequence number
pub fn next_sequence_number(current: u8) -> u8 {
    current.wrapping_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_number_scoped_by_origin() {
        let local = ChannelNumber::local(101);
        let remote = ChannelNumber::remote(101);
        assert_ne!(local, remote);
        assert!(remote.is_from_remote());
        assert!(!local.is_from_remote());
        assert_eq!(remote.to_string(), "101(remote)");
    }

    #[test]
    fn test_sequence_number_wraps() {
        assert_eq!(next_sequence_number(254), 255);
        assert_eq!(next_sequence_number(255), 0);
    }
}
