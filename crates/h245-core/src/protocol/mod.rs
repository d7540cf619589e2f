//! H.245 message values and identifiers
//!
//! ## Key Components
//!
//! - [`H245Message`]: every decoded message the negotiation machines handle
//! - [`ChannelNumber`]: logical channel id scoped by [`Origin`]
//! - [`MasterSlaveStatus`]: result of master/slave determination

pub mod messages;
pub mod types;

pub use messages::*;
pub use types::*;
