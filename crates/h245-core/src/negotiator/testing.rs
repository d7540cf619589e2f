//! Recording connection for the machine unit tests

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::context::NegotiatorEnvironment;
use crate::capability::{Capability, RemoteCapabilitySet};
use crate::channel::MediaChannel;
use crate::config::NegotiationConfig;
use crate::connection::{CallEndReason, CapabilityVerdict, ChannelConflict, ControlConnection, ModeSelection};
use crate::errors::{ProtocolErrorKind, TransportError};
use crate::protocol::{
    ChannelDirection, ChannelNumber, ChannelParameters, H245Message, ModeDescription, OpenLogicalChannel,
    OpenRejectCause, RequestModeAckResponse, RequestModeRejectCause,
};

pub(crate) struct RecordingConnection {
    pub sent: Mutex<Vec<H245Message>>,
    pub errors: Mutex<Vec<(ProtocolErrorKind, String)>>,
    pub verdict: Mutex<CapabilityVerdict>,
    pub selection: Mutex<ModeSelection>,
    pub cleared: Mutex<Vec<CallEndReason>>,
    pub mode_changes: Mutex<Vec<ModeDescription>>,
    pub accepted: Mutex<Vec<RequestModeAckResponse>>,
    pub refused: Mutex<Vec<Option<RequestModeRejectCause>>>,
}

impl RecordingConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            verdict: Mutex::new(CapabilityVerdict::Accept),
            selection: Mutex::new(ModeSelection::Accept(0)),
            cleared: Mutex::new(Vec::new()),
            mode_changes: Mutex::new(Vec::new()),
            accepted: Mutex::new(Vec::new()),
            refused: Mutex::new(Vec::new()),
        })
    }

    pub fn take_sent(&self) -> Vec<H245Message> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn error_reasons(&self) -> Vec<String> {
        self.errors.lock().iter().map(|(_, reason)| reason.clone()).collect()
    }
}

#[async_trait]
impl ControlConnection for RecordingConnection {
    async fn write_control_message(&self, message: H245Message) -> Result<(), TransportError> {
        self.sent.lock().push(message);
        Ok(())
    }

    fn report_protocol_error(&self, kind: ProtocolErrorKind, reason: &str) -> bool {
        self.errors.lock().push((kind, reason.to_string()));
        true
    }

    fn create_logical_channel(
        &self,
        _open: &OpenLogicalChannel,
        _number: ChannelNumber,
    ) -> Result<Box<dyn MediaChannel>, OpenRejectCause> {
        Err(OpenRejectCause::DataTypeNotSupported)
    }

    fn create_realtime_channel(
        &self,
        _capability: &dyn Capability,
        _direction: ChannelDirection,
        _session_id: u32,
        _parameters: Option<&ChannelParameters>,
    ) -> Option<Box<dyn MediaChannel>> {
        None
    }

    fn arbitrate_capability_set(&self, _remote: &RemoteCapabilitySet) -> CapabilityVerdict {
        *self.verdict.lock()
    }

    fn choose_request_mode(&self, _modes: &[ModeDescription]) -> ModeSelection {
        *self.selection.lock()
    }

    fn resolve_channel_conflict(&self, _conflict: &ChannelConflict) {}

    fn clear_call(&self, reason: CallEndReason) {
        self.cleared.lock().push(reason);
    }

    fn on_mode_changed(&self, mode: &ModeDescription) {
        self.mode_changes.lock().push(mode.clone());
    }

    fn on_request_mode_accepted(&self, response: RequestModeAckResponse) {
        self.accepted.lock().push(response);
    }

    fn on_request_mode_refused(&self, cause: Option<RequestModeRejectCause>) {
        self.refused.lock().push(cause);
    }
}

pub(crate) fn environment(config: NegotiationConfig) -> (NegotiatorEnvironment, Arc<RecordingConnection>) {
    let connection = RecordingConnection::new();
    (NegotiatorEnvironment::new(config, connection.clone()), connection)
}
