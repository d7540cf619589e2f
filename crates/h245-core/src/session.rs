//! H.245 session: every negotiation machine of one call
//!
//! [`H245Session`] owns the machines, routes each decoded control message to
//! the one responsible for it and drives the standard start-up sequence:
//! capability exchange first, then master/slave determination.

use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::compat::CompatibilityPolicy;
use crate::config::NegotiationConfig;
use crate::connection::ControlConnection;
use crate::errors::{H245Error, H245Result};
use crate::negotiator::{
    CapabilitySetExchange, LogicalChannelRegistry, MasterSlaveDetermination, NegotiatorEnvironment,
    RequestModeNegotiation, RoundTripDelayMonitor,
};
use crate::protocol::H245Message;

/// Negotiation state of one H.323 call's control channel
pub struct H245Session {
    env: NegotiatorEnvironment,
    master_slave: Arc<MasterSlaveDetermination>,
    capability_exchange: Arc<CapabilitySetExchange>,
    channels: LogicalChannelRegistry,
    request_mode: Arc<RequestModeNegotiation>,
    round_trip_delay: Arc<RoundTripDelayMonitor>,
}

impl H245Session {
    /// Create a session after validating `config`
    pub fn new(config: NegotiationConfig, connection: Arc<dyn ControlConnection>) -> H245Result<Self> {
        config.validate().map_err(H245Error::config)?;
        Ok(Self::with_environment(NegotiatorEnvironment::new(config, connection)))
    }

    pub fn with_policy(
        config: NegotiationConfig,
        connection: Arc<dyn ControlConnection>,
        policy: Arc<dyn CompatibilityPolicy>,
    ) -> H245Result<Self> {
        config.validate().map_err(H245Error::config)?;
        Ok(Self::with_environment(
            NegotiatorEnvironment::new(config, connection).with_policy(policy),
        ))
    }

    fn with_environment(env: NegotiatorEnvironment) -> Self {
        let master_slave = MasterSlaveDetermination::new(env.clone());
        Self {
            capability_exchange: CapabilitySetExchange::new(env.clone()),
            channels: LogicalChannelRegistry::new(env.clone(), master_slave.clone()),
            request_mode: RequestModeNegotiation::new(env.clone()),
            round_trip_delay: RoundTripDelayMonitor::new(env.clone()),
            master_slave,
            env,
        }
    }

    /// Send our capability set, then begin master/slave determination
    pub async fn start(&self) -> H245Result<()> {
        info!("Starting H.245 negotiation (terminal type {})", self.env.config.terminal_type);
        self.capability_exchange.start(false, false).await?;
        self.master_slave.start(false).await
    }

    /// Probe the round trip delay at the configured rate
    pub fn start_round_trip_monitor(&self) -> H245Result<()> {
        self.round_trip_delay
            .start_periodic(self.env.config.round_trip_delay_rate)
    }

    /// Route one decoded message from the remote
    pub async fn handle_message(&self, message: H245Message) -> H245Result<()> {
        trace!("Received {}", message);
        match message {
            H245Message::MasterSlaveDetermination {
                terminal_type,
                determination_number,
            } => {
                self.master_slave
                    .handle_incoming(terminal_type, determination_number)
                    .await
            }
            H245Message::MasterSlaveDeterminationAck { decision } => self.master_slave.handle_ack(decision).await,
            H245Message::MasterSlaveDeterminationReject { cause } => self.master_slave.handle_reject(cause).await,
            H245Message::MasterSlaveDeterminationRelease => self.master_slave.handle_release().await,

            H245Message::TerminalCapabilitySet(set) => self.capability_exchange.handle_incoming(set).await,
            H245Message::TerminalCapabilitySetAck { sequence_number } => {
                self.capability_exchange.handle_ack(sequence_number).await
            }
            H245Message::TerminalCapabilitySetReject { sequence_number, cause } => {
                self.capability_exchange.handle_reject(sequence_number, cause).await
            }
            H245Message::TerminalCapabilitySetRelease => self.capability_exchange.handle_release().await,

            H245Message::OpenLogicalChannel(open) => self.channels.handle_open(&open).await,
            H245Message::OpenLogicalChannelAck(ack) => self.channels.handle_open_ack(&ack).await,
            H245Message::OpenLogicalChannelConfirm { channel_number } => {
                self.channels.handle_open_confirm(channel_number).await
            }
            H245Message::OpenLogicalChannelReject { channel_number, cause } => {
                self.channels.handle_reject(channel_number, cause).await
            }
            H245Message::CloseLogicalChannel { channel_number, .. } => {
                self.channels.handle_close(channel_number).await
            }
            H245Message::CloseLogicalChannelAck { channel_number } => {
                self.channels.handle_close_ack(channel_number).await
            }
            H245Message::RequestChannelClose { channel_number, reason } => {
                self.channels.handle_request_close(channel_number, reason).await
            }
            H245Message::RequestChannelCloseAck { channel_number } => {
                self.channels.handle_request_close_ack(channel_number).await
            }
            H245Message::RequestChannelCloseReject { channel_number } => {
                self.channels.handle_request_close_reject(channel_number).await
            }
            H245Message::RequestChannelCloseRelease { channel_number } => {
                self.channels.handle_request_close_release(channel_number).await
            }
            H245Message::LogicalChannelActive { channel_number } => {
                debug!("Remote logical channel {} is active", channel_number);
                Ok(())
            }

            H245Message::RequestMode {
                sequence_number,
                requested_modes,
            } => {
                self.request_mode
                    .handle_request(sequence_number, requested_modes)
                    .await
            }
            H245Message::RequestModeAck {
                sequence_number,
                response,
            } => self.request_mode.handle_ack(sequence_number, response).await,
            H245Message::RequestModeReject { sequence_number, cause } => {
                self.request_mode.handle_reject(sequence_number, cause).await
            }
            H245Message::RequestModeRelease => self.request_mode.handle_release().await,

            H245Message::RoundTripDelayRequest { sequence_number } => {
                self.round_trip_delay.handle_request(sequence_number).await
            }
            H245Message::RoundTripDelayResponse { sequence_number } => {
                self.round_trip_delay.handle_response(sequence_number).await
            }
        }
    }

    /// Stop probing and release every logical channel
    pub fn shutdown(&self) {
        info!("Shutting down H.245 session ({} logical channels)", self.channels.len());
        self.round_trip_delay.stop_periodic();
        self.channels.remove_all();
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.env.config
    }

    pub fn master_slave(&self) -> &Arc<MasterSlaveDetermination> {
        &self.master_slave
    }

    pub fn capability_exchange(&self) -> &Arc<CapabilitySetExchange> {
        &self.capability_exchange
    }

    pub fn channels(&self) -> &LogicalChannelRegistry {
        &self.channels
    }

    pub fn request_mode(&self) -> &Arc<RequestModeNegotiation> {
        &self.request_mode
    }

    pub fn round_trip_delay(&self) -> &Arc<RoundTripDelayMonitor> {
        &self.round_trip_delay
    }

    /// Both capability sets exchanged and master/slave determined
    pub fn is_negotiated(&self) -> bool {
        self.capability_exchange.has_sent_capabilities()
            && self.capability_exchange.has_received_capabilities()
            && self.master_slave.is_determined()
    }
}

impl Drop for H245Session {
    fn drop(&mut self) {
        self.round_trip_delay.stop_periodic();
    }
}
