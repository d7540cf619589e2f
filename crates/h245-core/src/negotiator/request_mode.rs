//! Mode request (H.245 §8.9)
//!
//! Asks the remote to change what it transmits, and answers the remote's
//! requests using [`ControlConnection::choose_request_mode`](crate::ControlConnection::choose_request_mode).

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::context::{NegotiatorContext, NegotiatorEnvironment, Transition};
use crate::connection::ModeSelection;
use crate::errors::{H245Error, H245Result, ProtocolErrorKind};
use crate::protocol::{
    next_sequence_number, H245Message, ModeDescription, RequestModeAckResponse, RequestModeRejectCause,
};

#[derive(Debug, Default)]
struct RequestState {
    awaiting_response: bool,
    out_sequence: u8,
    in_sequence: Option<u8>,
}

/// Notification for the connection, delivered after the messages are sent
enum Outcome {
    Quiet,
    ModeChanged(ModeDescription),
    Accepted(RequestModeAckResponse),
    Refused(Option<RequestModeRejectCause>),
}

/// Mode request signalling entity
pub struct RequestModeNegotiation {
    ctx: NegotiatorContext,
    inner: Mutex<RequestState>,
    me: Weak<Self>,
}

impl RequestModeNegotiation {
    pub fn new(env: NegotiatorEnvironment) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            ctx: NegotiatorContext::new(env, ProtocolErrorKind::RequestMode, "request mode"),
            inner: Mutex::new(RequestState::default()),
            me: me.clone(),
        })
    }

    /// Ask the remote to transmit one of `modes`, most preferred first
    pub async fn start_request(&self, modes: Vec<ModeDescription>) -> H245Result<()> {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.awaiting_response {
                return Err(H245Error::RequestPending(ProtocolErrorKind::RequestMode));
            }
            inner.out_sequence = next_sequence_number(inner.out_sequence);
            inner.awaiting_response = true;
            self.arm_timer();
            debug!("Requesting mode change seq={} ({} modes)", inner.out_sequence, modes.len());
            Transition::send(H245Message::RequestMode {
                sequence_number: inner.out_sequence,
                requested_modes: modes,
            })
        };
        self.ctx.complete(transition).await
    }

    pub async fn handle_request(&self, sequence_number: u8, modes: Vec<ModeDescription>) -> H245Result<()> {
        let (transition, outcome) = {
            let mut inner = self.inner.lock();
            inner.in_sequence = Some(sequence_number);

            match self.ctx.connection().choose_request_mode(&modes) {
                ModeSelection::Accept(index) if index < modes.len() => {
                    let response = if index == 0 {
                        RequestModeAckResponse::WillTransmitMostPreferredMode
                    } else {
                        RequestModeAckResponse::WillTransmitLessPreferredMode
                    };
                    debug!("Accepting requested mode {} of {} (seq={})", index, modes.len(), sequence_number);
                    (
                        Transition::send(H245Message::RequestModeAck {
                            sequence_number,
                            response,
                        }),
                        Outcome::ModeChanged(modes[index].clone()),
                    )
                }
                ModeSelection::Accept(index) => {
                    debug!("Selected mode {} is out of range, rejecting", index);
                    (
                        Transition::send(H245Message::RequestModeReject {
                            sequence_number,
                            cause: RequestModeRejectCause::ModeUnavailable,
                        }),
                        Outcome::Quiet,
                    )
                }
                ModeSelection::Reject(cause) => {
                    debug!("Rejecting mode request seq={}: {:?}", sequence_number, cause);
                    (
                        Transition::send(H245Message::RequestModeReject { sequence_number, cause }),
                        Outcome::Quiet,
                    )
                }
            }
        };
        self.finish(transition, outcome).await
    }

    pub async fn handle_ack(&self, sequence_number: u8, response: RequestModeAckResponse) -> H245Result<()> {
        if !self.take_response(sequence_number) {
            return Ok(());
        }
        debug!("Remote accepted mode request seq={}: {:?}", sequence_number, response);
        self.finish(Transition::none(), Outcome::Accepted(response)).await
    }

    pub async fn handle_reject(&self, sequence_number: u8, cause: RequestModeRejectCause) -> H245Result<()> {
        if !self.take_response(sequence_number) {
            return Ok(());
        }
        debug!("Remote refused mode request seq={}: {:?}", sequence_number, cause);
        self.finish(Transition::none(), Outcome::Refused(Some(cause))).await
    }

    fn take_response(&self, sequence_number: u8) -> bool {
        let mut inner = self.inner.lock();
        if !inner.awaiting_response || inner.out_sequence != sequence_number {
            trace!(
                "Ignoring mode response seq={} (awaiting={}, expecting {})",
                sequence_number,
                inner.awaiting_response,
                inner.out_sequence
            );
            return false;
        }
        inner.awaiting_response = false;
        self.ctx.timer.stop();
        true
    }

    pub async fn handle_release(&self) -> H245Result<()> {
        {
            let mut inner = self.inner.lock();
            inner.awaiting_response = false;
            self.ctx.timer.stop();
        }
        self.finish(Transition::none(), Outcome::Refused(None)).await
    }

    pub async fn handle_timeout(&self) -> H245Result<()> {
        self.expire(None).await
    }

    async fn on_timer_expired(&self, generation: u64) -> H245Result<()> {
        self.expire(Some(generation)).await
    }

    /// Nothing is reported unless an outstanding request was abandoned
    async fn expire(&self, generation: Option<u64>) -> H245Result<()> {
        let (transition, expired) = self.timeout_transition(generation);
        if !expired {
            return Ok(());
        }
        self.finish(transition, Outcome::Refused(None)).await
    }

    // The flag tells whether an outstanding request was abandoned
    fn timeout_transition(&self, generation: Option<u64>) -> (Transition, bool) {
        let mut inner = self.inner.lock();
        if let Some(generation) = generation {
            if !self.ctx.timer.is_current(generation) {
                trace!("Ignoring stale request mode timer");
                return (Transition::none(), false);
            }
        }
        self.ctx.timer.stop();
        if !inner.awaiting_response {
            return (Transition::none(), false);
        }
        inner.awaiting_response = false;
        debug!("Mode request seq={} timed out", inner.out_sequence);
        (Transition::send(H245Message::RequestModeRelease), true)
    }

    async fn finish(&self, transition: Transition, outcome: Outcome) -> H245Result<()> {
        let result = self.ctx.complete(transition).await;
        let connection = self.ctx.connection();
        match outcome {
            Outcome::Quiet => {}
            Outcome::ModeChanged(mode) => connection.on_mode_changed(&mode),
            Outcome::Accepted(response) => connection.on_request_mode_accepted(response),
            Outcome::Refused(cause) => connection.on_request_mode_refused(cause),
        }
        result
    }

    fn arm_timer(&self) {
        let me = self.me.clone();
        self.ctx
            .timer
            .arm(self.ctx.config().request_mode_timeout, move |generation| async move {
                if let Some(machine) = me.upgrade() {
                    if let Err(e) = machine.on_timer_expired(generation).await {
                        debug!("Request mode timeout handling failed: {}", e);
                    }
                }
            });
    }

    pub fn is_awaiting_response(&self) -> bool {
        self.inner.lock().awaiting_response
    }

    pub fn out_sequence_number(&self) -> u8 {
        self.inner.lock().out_sequence
    }

    /// Sequence number of the last request received from the remote
    pub fn in_sequence_number(&self) -> Option<u8> {
        self.inner.lock().in_sequence
    }
}
