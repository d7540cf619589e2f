//! Negotiation Configuration
//!
//! Read-only endpoint settings consumed by the H.245 negotiation machines:
//! reply timeouts, retry limits, the local terminal type and the local
//! capability table.
//!
//! ## Examples
//!
//! ```rust
//! use rvoip_h245_core::NegotiationConfig;
//! use std::time::Duration;
//!
//! let config = NegotiationConfig::new(60)                 // H.323 gateway
//!     .with_logical_channel_timeout(Duration::from_secs(10))
//!     .with_master_slave_retries(5);
//!
//! assert_eq!(config.terminal_type, 60);
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityTable;

/// Terminal type of a plain H.323 terminal
pub const TERMINAL_TYPE_TERMINAL: u8 = 50;
/// Terminal type of a gateway without MC
pub const TERMINAL_TYPE_GATEWAY: u8 = 60;
/// Terminal type of an MCU with MC
pub const TERMINAL_TYPE_MCU: u8 = 160;

/// Settings shared by all negotiation machines of a call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationConfig {
    /// Terminal type used as the primary master/slave tie-break
    pub terminal_type: u8,

    /// Reply timer for master/slave determination
    pub master_slave_timeout: Duration,

    /// Attempts before an indeterminate determination is abandoned
    pub master_slave_retries: u32,

    /// Passively wait for the remote's determination request and always
    /// take the slave role. Some gateways only interoperate this way.
    pub force_slave: bool,

    /// Reply timer for terminal capability exchange
    pub capability_exchange_timeout: Duration,

    /// Reply timer for logical channel signalling
    pub logical_channel_timeout: Duration,

    /// Reply timer for mode requests
    pub request_mode_timeout: Duration,

    /// Reply timer for round trip delay probes
    pub round_trip_delay_timeout: Duration,

    /// Interval between periodic round trip delay probes
    pub round_trip_delay_rate: Duration,

    /// Missed probes tolerated before the remote is presumed offline
    pub round_trip_delay_retries: u32,

    /// Last channel number reserved for externally assigned channels;
    /// local allocations start above it
    pub channel_number_base: u32,

    /// Highest logical channel number before allocation wraps
    pub max_channel_number: u32,

    /// Local capability table sent in TerminalCapabilitySet
    pub local_capabilities: CapabilityTable,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            terminal_type: TERMINAL_TYPE_TERMINAL,
            master_slave_timeout: Duration::from_secs(30),
            master_slave_retries: 10,
            force_slave: false,
            capability_exchange_timeout: Duration::from_secs(30),
            logical_channel_timeout: Duration::from_secs(30),
            request_mode_timeout: Duration::from_secs(30),
            round_trip_delay_timeout: Duration::from_secs(10),
            round_trip_delay_rate: Duration::from_secs(60),
            round_trip_delay_retries: 3,
            channel_number_base: 100,
            max_channel_number: 65535,
            local_capabilities: CapabilityTable::default(),
        }
    }
}

impl NegotiationConfig {
    /// Create a configuration for the given terminal type with defaults elsewhere
    pub fn new(terminal_type: u8) -> Self {
        Self {
            terminal_type,
            ..Default::default()
        }
    }

    pub fn with_capabilities(mut self, table: CapabilityTable) -> Self {
        self.local_capabilities = table;
        self
    }

    pub fn with_master_slave_timeout(mut self, timeout: Duration) -> Self {
        self.master_slave_timeout = timeout;
        self
    }

    pub fn with_master_slave_retries(mut self, retries: u32) -> Self {
        self.master_slave_retries = retries;
        self
    }

    /// Take the slave role without sending a determination request
    pub fn with_forced_slave(mut self) -> Self {
        self.force_slave = true;
        self
    }

    pub fn with_capability_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.capability_exchange_timeout = timeout;
        self
    }

    pub fn with_logical_channel_timeout(mut self, timeout: Duration) -> Self {
        self.logical_channel_timeout = timeout;
        self
    }

    pub fn with_request_mode_timeout(mut self, timeout: Duration) -> Self {
        self.request_mode_timeout = timeout;
        self
    }

    /// Set the round trip delay reply timeout and probe interval
    pub fn with_round_trip_delay(mut self, timeout: Duration, rate: Duration) -> Self {
        self.round_trip_delay_timeout = timeout;
        self.round_trip_delay_rate = rate;
        self
    }

    pub fn with_round_trip_delay_retries(mut self, retries: u32) -> Self {
        self.round_trip_delay_retries = retries;
        self
    }

    /// Set the range local channel numbers are allocated from
    pub fn with_channel_numbers(mut self, base: u32, max: u32) -> Self {
        self.channel_number_base = base;
        self.max_channel_number = max;
        self
    }

    /// Validate the configuration
    ///
    /// # Returns
    /// Ok(()) if valid, Err(message) if invalid
    pub fn validate(&self) -> Result<(), String> {
        let timeouts = [
            ("Master/slave timeout", self.master_slave_timeout),
            ("Capability exchange timeout", self.capability_exchange_timeout),
            ("Logical channel timeout", self.logical_channel_timeout),
            ("Request mode timeout", self.request_mode_timeout),
            ("Round trip delay timeout", self.round_trip_delay_timeout),
        ];
        for (name, timeout) in timeouts {
            if timeout.is_zero() {
                return Err(format!("{} must be greater than 0", name));
            }
        }

        if self.master_slave_retries == 0 {
            return Err("Master/slave retries must be greater than 0".to_string());
        }
        if self.round_trip_delay_retries == 0 {
            return Err("Round trip delay retries must be greater than 0".to_string());
        }

        if self.max_channel_number > 65535 {
            return Err("Max channel number must not exceed 65535".to_string());
        }

        if self.channel_number_base >= self.max_channel_number {
            return Err(format!(
                "Channel number base {} must be below max channel number {}",
                self.channel_number_base, self.max_channel_number
            ));
        }

        Ok(())
    }
}
