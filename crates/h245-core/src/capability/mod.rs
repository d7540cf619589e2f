//! Capability lookup surface used by the negotiation machines
//!
//! Real capability modelling (codec parameters, wildcard matching) belongs to
//! the endpoint. The machines only need three things from it:
//!
//! - encode a capability into the [`DataType`] of an OpenLogicalChannel
//! - build a TerminalCapabilitySet from the local [`CapabilityTable`]
//! - expose the remote set as a [`RemoteCapabilitySet`] for arbitration

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::{DataType, MediaType, MultiplexCapability, TerminalCapabilitySet, VideoRole};

/// A media capability that can be placed in an OpenLogicalChannel
pub trait Capability: Send + Sync + fmt::Debug {
    fn media_type(&self) -> MediaType;

    fn name(&self) -> &str;

    /// Encode into the data type of an OpenLogicalChannel
    ///
    /// Returns `None` when this capability cannot be used for a channel.
    fn encode_data_type(&self, role: Option<VideoRole>) -> Option<DataType>;
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CapabilityDirection {
    Receive,
    Transmit,
    ReceiveAndTransmit,
}

/// One row of a capability table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityEntry {
    /// Capability table entry number (1..65535)
    pub number: u16,
    pub media_type: MediaType,
    pub name: String,
    pub direction: CapabilityDirection,
    pub max_bit_rate: Option<u32>,
}

impl CapabilityEntry {
    pub fn new(number: u16, media_type: MediaType, name: impl Into<String>) -> Self {
        Self {
            number,
            media_type,
            name: name.into(),
            direction: CapabilityDirection::ReceiveAndTransmit,
            max_bit_rate: None,
        }
    }

    pub fn with_direction(mut self, direction: CapabilityDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_max_bit_rate(mut self, bit_rate: u32) -> Self {
        self.max_bit_rate = Some(bit_rate);
        self
    }
}

impl Capability for CapabilityEntry {
    fn media_type(&self) -> MediaType {
        self.media_type
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn encode_data_type(&self, role: Option<VideoRole>) -> Option<DataType> {
        if self.media_type == MediaType::UserInput {
            return None;
        }
        // Role labels only apply to H.239 extended video
        let role = match self.media_type {
            MediaType::ExtendedVideo => role.or(Some(VideoRole::Presentation)),
            _ => None,
        };
        Some(DataType {
            media_type: self.media_type,
            capability_name: self.name.clone(),
            max_bit_rate: self.max_bit_rate,
            role,
        })
    }
}

/// Simultaneous capabilities: each inner list is an alternative set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub number: u8,
    pub simultaneous: Vec<Vec<u16>>,
}

/// Capability table with its descriptors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityTable {
    pub entries: Vec<CapabilityEntry>,
    pub descriptors: Vec<CapabilityDescriptor>,
    pub multiplex: Option<MultiplexCapability>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, placing it in its own alternative set of descriptor 0
    pub fn add(&mut self, entry: CapabilityEntry) {
        if self.descriptors.is_empty() {
            self.descriptors.push(CapabilityDescriptor::default());
        }
        self.descriptors[0].simultaneous.push(vec![entry.number]);
        self.entries.push(entry);
    }

    pub fn with_entry(mut self, entry: CapabilityEntry) -> Self {
        self.add(entry);
        self
    }

    pub fn with_multiplex(mut self, multiplex: MultiplexCapability) -> Self {
        self.multiplex = Some(multiplex);
        self
    }

    pub fn find_by_number(&self, number: u16) -> Option<&CapabilityEntry> {
        self.entries.iter().find(|e| e.number == number)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&CapabilityEntry> {
        self.entries.iter().find(|e| e.name.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the TerminalCapabilitySet carrying this table
    ///
    /// An `empty` set carries no table or descriptors, which tells the remote
    /// to stop transmitting until a new set is sent.
    pub fn to_capability_set(&self, sequence_number: u8, empty: bool) -> TerminalCapabilitySet {
        if empty {
            return TerminalCapabilitySet {
                sequence_number,
                ..Default::default()
            };
        }
        TerminalCapabilitySet {
            sequence_number,
            capability_table: self.entries.clone(),
            descriptors: self.descriptors.clone(),
            multiplex_capability: self.multiplex.clone(),
        }
    }
}

/// The remote endpoint's capabilities as received in a TerminalCapabilitySet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCapabilitySet {
    pub sequence_number: u8,
    pub table: CapabilityTable,
}

impl RemoteCapabilitySet {
    pub fn from_message(set: &TerminalCapabilitySet) -> Self {
        Self {
            sequence_number: set.sequence_number,
            table: CapabilityTable {
                entries: set.capability_table.clone(),
                descriptors: set.descriptors.clone(),
                multiplex: set.multiplex_capability.clone(),
            },
        }
    }

    /// Remote asked us to pause transmission
    pub fn is_empty(&self) -> bool {
        self.table.entries.is_empty() && self.table.descriptors.is_empty()
    }

    pub fn multiplex(&self) -> Option<&MultiplexCapability> {
        self.table.multiplex.as_ref()
    }

    /// Whether the remote can receive the named capability
    pub fn can_receive(&self, media_type: MediaType, name: &str) -> bool {
        self.table.entries.iter().any(|e| {
            e.media_type == media_type
                && e.name.eq_ignore_ascii_case(name)
                && e.direction != CapabilityDirection::Transmit
        })
    }

    /// Descriptor entries that refer to a table entry the set does not define
    pub fn undefined_entries(&self) -> Vec<u16> {
        let mut missing = Vec::new();
        for descriptor in &self.table.descriptors {
            for alternative in &descriptor.simultaneous {
                for number in alternative {
                    if self.table.find_by_number(*number).is_none() && !missing.contains(number) {
                        missing.push(*number);
                    }
                }
            }
        }
        missing
    }
}
