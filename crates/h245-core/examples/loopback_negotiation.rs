//! Two H.245 sessions negotiating over an in-process control channel
//!
//! Run with `RUST_LOG=rvoip_h245_core=debug cargo run --example loopback_negotiation`
//! to see every message the machines exchange.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use rvoip_h245_core::{
    Capability, CapabilityEntry, CapabilityTable, CapabilityVerdict, ChannelConflict, ChannelDirection,
    ChannelNumber, ChannelParameters, ControlConnection, H245Message, H245Session, MediaChannel, MediaType,
    ModeDescription, ModeSelection, NegotiationConfig, OpenLogicalChannel, OpenRejectCause, ProtocolErrorKind,
    RemoteCapabilitySet, TransportError, TERMINAL_TYPE_GATEWAY, TERMINAL_TYPE_TERMINAL,
};

/// Media channel that only logs its lifecycle
struct LoggingChannel {
    endpoint: &'static str,
    number: ChannelNumber,
    direction: ChannelDirection,
    session_id: u32,
}

impl MediaChannel for LoggingChannel {
    fn number(&self) -> ChannelNumber {
        self.number
    }

    fn set_number(&mut self, number: ChannelNumber) {
        self.number = number;
    }

    fn direction(&self) -> ChannelDirection {
        self.direction
    }

    fn session_id(&self) -> u32 {
        self.session_id
    }

    fn open(&mut self) -> bool {
        true
    }

    fn start(&mut self) -> bool {
        info!("[{}] media channel {} started ({:?})", self.endpoint, self.number, self.direction);
        true
    }

    fn cleanup_on_termination(&mut self) {
        info!("[{}] media channel {} stopped", self.endpoint, self.number);
    }
}

/// Control connection writing into the peer's inbox
struct LoopbackConnection {
    endpoint: &'static str,
    peer: mpsc::UnboundedSender<H245Message>,
    delays: Mutex<Vec<Duration>>,
}

#[async_trait]
impl ControlConnection for LoopbackConnection {
    async fn write_control_message(&self, message: H245Message) -> Result<(), TransportError> {
        self.peer
            .send(message)
            .map_err(|_| TransportError::Closed)
    }

    fn report_protocol_error(&self, kind: ProtocolErrorKind, reason: &str) -> bool {
        warn!("[{}] {} error: {}", self.endpoint, kind, reason);
        true
    }

    fn create_logical_channel(
        &self,
        open: &OpenLogicalChannel,
        number: ChannelNumber,
    ) -> Result<Box<dyn MediaChannel>, OpenRejectCause> {
        Ok(Box::new(LoggingChannel {
            endpoint: self.endpoint,
            number,
            direction: ChannelDirection::Receiver,
            session_id: open.forward_parameters.session_id,
        }))
    }

    fn create_realtime_channel(
        &self,
        _capability: &dyn Capability,
        direction: ChannelDirection,
        session_id: u32,
        _parameters: Option<&ChannelParameters>,
    ) -> Option<Box<dyn MediaChannel>> {
        Some(Box::new(LoggingChannel {
            endpoint: self.endpoint,
            number: ChannelNumber::local(0),
            direction,
            session_id,
        }))
    }

    fn arbitrate_capability_set(&self, remote: &RemoteCapabilitySet) -> CapabilityVerdict {
        info!("[{}] remote offers {} capabilities", self.endpoint, remote.table.len());
        CapabilityVerdict::Accept
    }

    fn choose_request_mode(&self, _modes: &[ModeDescription]) -> ModeSelection {
        ModeSelection::Accept(0)
    }

    fn resolve_channel_conflict(&self, conflict: &ChannelConflict) {
        warn!("[{}] channel conflict on session {}", self.endpoint, conflict.session_id);
    }

    fn on_round_trip_delay(&self, delay: Duration) {
        self.delays.lock().push(delay);
    }
}

fn endpoint(
    name: &'static str,
    terminal_type: u8,
    peer: mpsc::UnboundedSender<H245Message>,
) -> Result<(H245Session, Arc<LoopbackConnection>), Box<dyn std::error::Error>> {
    let connection = Arc::new(LoopbackConnection {
        endpoint: name,
        peer,
        delays: Mutex::new(Vec::new()),
    });
    let table = CapabilityTable::new()
        .with_entry(CapabilityEntry::new(1, MediaType::Audio, "G.711-uLaw-64k"))
        .with_entry(CapabilityEntry::new(2, MediaType::Video, "H.264"));
    let config = NegotiationConfig::new(terminal_type).with_capabilities(table);
    let session = H245Session::new(config, connection.clone())?;
    Ok((session, connection))
}

/// Feed received messages into `session` until the line stays quiet
async fn serve(name: &str, session: &H245Session, inbox: &mut mpsc::UnboundedReceiver<H245Message>) {
    while let Ok(Some(message)) = tokio::time::timeout(Duration::from_millis(200), inbox.recv()).await {
        if let Err(e) = session.handle_message(message).await {
            warn!("[{}] {}", name, e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (to_terminal, mut terminal_inbox) = mpsc::unbounded_channel();
    let (to_gateway, mut gateway_inbox) = mpsc::unbounded_channel();

    let (terminal, _) = endpoint("terminal", TERMINAL_TYPE_TERMINAL, to_gateway)?;
    let (gateway, gateway_connection) = endpoint("gateway", TERMINAL_TYPE_GATEWAY, to_terminal)?;

    terminal.start().await?;
    gateway.start().await?;
    futures::join!(
        serve("terminal", &terminal, &mut terminal_inbox),
        serve("gateway", &gateway, &mut gateway_inbox),
    );

    info!(
        "Negotiated: terminal is {}, gateway is {}",
        terminal.master_slave().status(),
        gateway.master_slave().status()
    );

    let audio: Arc<dyn Capability> = Arc::new(CapabilityEntry::new(1, MediaType::Audio, "G.711-uLaw-64k"));
    let number = terminal.channels().open(audio, 1, None, None).await?;
    gateway.round_trip_delay().start_request().await?;
    futures::join!(
        serve("terminal", &terminal, &mut terminal_inbox),
        serve("gateway", &gateway, &mut gateway_inbox),
    );

    if let Some(channel) = terminal.channels().find(number) {
        info!("Channel {} is {:?}", number, channel.state());
    }
    if let Some(delay) = gateway_connection.delays.lock().last() {
        info!("Round trip delay: {:?}", delay);
    }

    terminal.channels().close(number.id, false).await?;
    futures::join!(
        serve("terminal", &terminal, &mut terminal_inbox),
        serve("gateway", &gateway, &mut gateway_inbox),
    );

    terminal.shutdown();
    gateway.shutdown();
    Ok(())
}
