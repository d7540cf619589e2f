//! Shared mocks for the h245-core integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use rvoip_h245_core::{
    Capability, CapabilityEntry, CapabilityVerdict, ChannelConflict, ChannelDirection, ChannelNumber,
    ChannelParameters, ControlConnection, H245Message, MediaChannel, MediaType, ModeDescription, ModeSelection,
    OpenLogicalChannel, OpenLogicalChannelAck, OpenRejectCause, ProtocolErrorKind, RemoteCapabilitySet,
    RequestCloseReason, TransportError,
};

/// Initialize test logging once
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("rvoip_h245_core=debug")
        .with_test_writer()
        .try_init();
}

/// Knobs and lifecycle log shared by the connection and the channels it creates
#[derive(Default)]
pub struct ChannelLab {
    pub events: Mutex<Vec<String>>,
    /// Results for successive `start()` calls; `true` once exhausted
    pub start_results: Mutex<VecDeque<bool>>,
    pub refuse_open: AtomicBool,
    pub refuse_ack: AtomicBool,
    pub bidirectional_open: AtomicBool,
}

impl ChannelLab {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn fail_next_starts(&self, results: &[bool]) {
        self.start_results.lock().extend(results.iter().copied());
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }
}

pub struct MockChannel {
    number: ChannelNumber,
    direction: ChannelDirection,
    session_id: u32,
    lab: Arc<ChannelLab>,
}

impl MockChannel {
    pub fn new(number: ChannelNumber, direction: ChannelDirection, session_id: u32, lab: Arc<ChannelLab>) -> Self {
        Self {
            number,
            direction,
            session_id,
            lab,
        }
    }
}

impl MediaChannel for MockChannel {
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
        self.lab.record(format!("open {}", self.number));
        !self.lab.refuse_open.load(Ordering::SeqCst)
    }

    fn start(&mut self) -> bool {
        self.lab.record(format!("start {}", self.number));
        self.lab.start_results.lock().pop_front().unwrap_or(true)
    }

    fn cleanup_on_termination(&mut self) {
        self.lab.record(format!("cleanup {}", self.number));
    }

    fn on_sending_open(&self, open: &mut OpenLogicalChannel) -> bool {
        if self.lab.bidirectional_open.load(Ordering::SeqCst) {
            open.reverse_parameters = Some(open.forward_parameters.clone());
        }
        true
    }

    fn on_sending_open_ack(&self, _open: &OpenLogicalChannel, ack: &mut OpenLogicalChannelAck) {
        ack.session_id = Some(self.session_id);
    }

    fn on_received_open_ack(&mut self, _ack: &OpenLogicalChannelAck) -> bool {
        !self.lab.refuse_ack.load(Ordering::SeqCst)
    }
}

/// Connection that records everything the machines do
pub struct MockConnection {
    pub sent: Mutex<Vec<H245Message>>,
    pub errors: Mutex<Vec<(ProtocolErrorKind, String)>>,
    pub continue_on_error: AtomicBool,
    pub lab: Arc<ChannelLab>,
    pub reject_remote_open: Mutex<Option<OpenRejectCause>>,
    pub conflicts: Mutex<Vec<ChannelConflict>>,
    pub accept_close: AtomicBool,
    pub verdict: Mutex<CapabilityVerdict>,
    pub selection: Mutex<ModeSelection>,
    pub remote_application: Mutex<String>,
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            continue_on_error: AtomicBool::new(true),
            lab: Arc::new(ChannelLab::default()),
            reject_remote_open: Mutex::new(None),
            conflicts: Mutex::new(Vec::new()),
            accept_close: AtomicBool::new(true),
            verdict: Mutex::new(CapabilityVerdict::Accept),
            selection: Mutex::new(ModeSelection::Accept(0)),
            remote_application: Mutex::new(String::new()),
        })
    }

    pub fn take_sent(&self) -> Vec<H245Message> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn sent_names(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(|message| message.name()).collect()
    }

    pub fn error_reasons(&self) -> Vec<String> {
        self.errors.lock().iter().map(|(_, reason)| reason.clone()).collect()
    }
}

#[async_trait]
impl ControlConnection for MockConnection {
    async fn write_control_message(&self, message: H245Message) -> Result<(), TransportError> {
        self.sent.lock().push(message);
        Ok(())
    }

    fn report_protocol_error(&self, kind: ProtocolErrorKind, reason: &str) -> bool {
        self.errors.lock().push((kind, reason.to_string()));
        self.continue_on_error.load(Ordering::SeqCst)
    }

    fn create_logical_channel(
        &self,
        open: &OpenLogicalChannel,
        number: ChannelNumber,
    ) -> Result<Box<dyn MediaChannel>, OpenRejectCause> {
        if let Some(cause) = *self.reject_remote_open.lock() {
            return Err(cause);
        }
        Ok(Box::new(MockChannel::new(
            number,
            ChannelDirection::Receiver,
            open.forward_parameters.session_id,
            self.lab.clone(),
        )))
    }

    fn create_realtime_channel(
        &self,
        capability: &dyn Capability,
        direction: ChannelDirection,
        session_id: u32,
        _parameters: Option<&ChannelParameters>,
    ) -> Option<Box<dyn MediaChannel>> {
        if capability.media_type() == MediaType::Data {
            return None;
        }
        Some(Box::new(MockChannel::new(
            ChannelNumber::local(0),
            direction,
            session_id,
            self.lab.clone(),
        )))
    }

    fn arbitrate_capability_set(&self, _remote: &RemoteCapabilitySet) -> CapabilityVerdict {
        *self.verdict.lock()
    }

    fn choose_request_mode(&self, _modes: &[ModeDescription]) -> ModeSelection {
        *self.selection.lock()
    }

    fn resolve_channel_conflict(&self, conflict: &ChannelConflict) {
        self.lab.record(format!("conflict {}", conflict.number));
        self.conflicts.lock().push(*conflict);
    }

    fn accept_close_request(&self, _number: ChannelNumber, _reason: RequestCloseReason) -> bool {
        self.accept_close.load(Ordering::SeqCst)
    }

    fn remote_application(&self) -> String {
        self.remote_application.lock().clone()
    }
}

pub fn audio() -> Arc<dyn Capability> {
    Arc::new(CapabilityEntry::new(1, MediaType::Audio, "G.711-uLaw-64k"))
}

pub fn presentation_video() -> Arc<dyn Capability> {
    Arc::new(CapabilityEntry::new(5, MediaType::ExtendedVideo, "H.264"))
}

pub fn data() -> Arc<dyn Capability> {
    Arc::new(CapabilityEntry::new(9, MediaType::Data, "T.120"))
}

/// An OpenLogicalChannel as a remote would send it
pub fn remote_open(channel_number: u32, session_id: u32, bidirectional: bool) -> OpenLogicalChannel {
    let data_type = CapabilityEntry::new(1, MediaType::Audio, "G.711-uLaw-64k")
        .encode_data_type(None)
        .expect("audio capability encodes");
    let forward = ChannelParameters::new(data_type, session_id);
    OpenLogicalChannel {
        channel_number,
        reverse_parameters: bidirectional.then(|| forward.clone()),
        forward_parameters: forward,
        replacement_for: None,
    }
}
