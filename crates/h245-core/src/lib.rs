//! # H.245 Core - Control Channel Negotiation for RVOIP
//!
//! This crate implements the H.245 signalling entities an H.323 endpoint runs
//! over its control channel once the call is connected:
//!
//! - **Master/slave determination** (§8.2): which endpoint arbitrates conflicts
//! - **Capability exchange** (§8.3): what each endpoint can receive
//! - **Logical channels** (§8.4): opening and closing media streams
//! - **Mode request** (§8.9): asking the remote to change what it transmits
//! - **Round trip delay** (§8.10): liveness probing of the remote
//!
//! Messages are exchanged as decoded [`H245Message`] values; PER encoding
//! and the media transport belong to the embedding application, which plugs
//! in through [`ControlConnection`] and [`MediaChannel`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_h245_core::{ControlConnection, H245Message, H245Session, NegotiationConfig};
//!
//! async fn run(
//!     connection: Arc<dyn ControlConnection>,
//!     incoming: Vec<H245Message>,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let session = H245Session::new(NegotiationConfig::new(50), connection)?;
//!     session.start().await?;
//!
//!     for message in incoming {
//!         session.handle_message(message).await?;
//!     }
//!
//!     if session.is_negotiated() {
//!         println!("master: {}", session.master_slave().is_master());
//!     }
//!     session.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency
//!
//! Every machine serialises its entry points through its own lock and never
//! holds it across an `.await`: the state transition is committed first, the
//! resulting messages are written afterwards. Reply timers run as tokio tasks
//! and carry a generation so an expiry that lost the race against a reply is
//! discarded.

pub mod capability;
pub mod channel;
pub mod compat;
pub mod config;
pub mod connection;
pub mod errors;
pub mod negotiator;
pub mod protocol;
pub mod session;

// Re-export main types
pub use capability::{
    Capability, CapabilityDescriptor, CapabilityDirection, CapabilityEntry, CapabilityTable, RemoteCapabilitySet,
};
pub use channel::MediaChannel;
pub use compat::{CompatibilityPolicy, StrictMaster, YieldToApplications};
pub use config::{NegotiationConfig, TERMINAL_TYPE_GATEWAY, TERMINAL_TYPE_MCU, TERMINAL_TYPE_TERMINAL};
pub use connection::{CallEndReason, CapabilityVerdict, ChannelConflict, ControlConnection, ModeSelection};
pub use errors::{H245Error, H245Result, ProtocolErrorKind, TransportError};
pub use negotiator::{
    determine_status, CapabilityExchangeState, CapabilitySetExchange, LogicalChannel, LogicalChannelRegistry,
    LogicalChannelState, MasterSlaveDetermination, MasterSlaveState, NegotiatorEnvironment,
    RequestModeNegotiation, RoundTripDelayMonitor,
};
pub use protocol::*;
pub use session::H245Session;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
