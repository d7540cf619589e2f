//! H.245 negotiation state machines
//!
//! Every machine follows the same pattern: an entry point takes the machine's
//! lock, commits the state transition and collects the messages it implies,
//! releases the lock, then writes the messages and reports any protocol error
//! through the [`ControlConnection`](crate::ControlConnection).

pub mod capability_exchange;
pub mod channel_registry;
pub mod context;
pub mod logical_channel;
pub mod master_slave;
pub mod request_mode;
pub mod round_trip_delay;
pub mod timer;

#[cfg(test)]
pub(crate) mod testing;

pub use capability_exchange::{CapabilityExchangeState, CapabilitySetExchange};
pub use channel_registry::LogicalChannelRegistry;
pub use context::{NegotiatorContext, NegotiatorEnvironment};
pub use logical_channel::{LogicalChannel, LogicalChannelState};
pub use master_slave::{determine_status, MasterSlaveDetermination, MasterSlaveState};
pub use request_mode::RequestModeNegotiation;
pub use round_trip_delay::RoundTripDelayMonitor;
pub use timer::ReplyTimer;
