//! Logical channel signalling (H.245 §8.4)
//!
//! One [`LogicalChannel`] per channel number. It owns the media channel for
//! as long as the logical channel exists and drops it on release, after its
//! reply timer is stopped.
//!
//! ```text
//!                 open()                      OpenAck
//!   Released ───────────────▶ AwaitingEstablishment ───────▶ Established
//!      ▲  remote Open (bidirectional)                          │   │
//!      │──────────▶ AwaitingConfirmation ── Confirm ──────────▶│   │ close()
//!      │                                                       │   ▼
//!      └──── CloseAck / RequestCloseAck ◀── AwaitingRelease / AwaitingResponse
//! ```

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::context::{NegotiatorContext, NegotiatorEnvironment, Transition};
use super::master_slave::MasterSlaveDetermination;
use crate::capability::Capability;
use crate::channel::MediaChannel;
use crate::connection::ChannelConflict;
use crate::errors::{H245Error, H245Result, ProtocolErrorKind};
use crate::protocol::{
    ChannelDirection, ChannelNumber, ChannelParameters, CloseSource, H245Message, MediaType,
    OpenLogicalChannel, OpenLogicalChannelAck, OpenRejectCause, RequestCloseReason, VideoRole,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalChannelState {
    Released,
    AwaitingEstablishment,
    Established,
    AwaitingRelease,
    AwaitingConfirmation,
    AwaitingResponse,
}

struct ChannelEntry {
    state: LogicalChannelState,
    channel: Option<Box<dyn MediaChannel>>,
    capability: Option<Arc<dyn Capability>>,
    session_id: u32,
    direction: Option<ChannelDirection>,
    role: Option<VideoRole>,
}

/// What to do with the conflicting media channel once the lock is released
enum Conflict {
    None,
    /// Master yields or we are slave: let the connection clear the way, then start again
    Resolve {
        channel: Box<dyn MediaChannel>,
        ack: OpenLogicalChannelAck,
        conflict: ChannelConflict,
    },
}

/// Negotiation state of one logical channel
pub struct LogicalChannel {
    number: ChannelNumber,
    ctx: NegotiatorContext,
    master_slave: Arc<MasterSlaveDetermination>,
    inner: Mutex<ChannelEntry>,
    me: Weak<Self>,
}

impl LogicalChannel {
    pub fn new(
        env: NegotiatorEnvironment,
        master_slave: Arc<MasterSlaveDetermination>,
        number: ChannelNumber,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            number,
            ctx: NegotiatorContext::new(env, ProtocolErrorKind::LogicalChannel, "logical channel"),
            master_slave,
            inner: Mutex::new(ChannelEntry {
                state: LogicalChannelState::Released,
                channel: None,
                capability: None,
                session_id: 0,
                direction: None,
                role: None,
            }),
            me: me.clone(),
        })
    }

    /// Wrap a media channel that is already running
    pub fn established(
        env: NegotiatorEnvironment,
        master_slave: Arc<MasterSlaveDetermination>,
        channel: Box<dyn MediaChannel>,
    ) -> Arc<Self> {
        let logical = Self::new(env, master_slave, channel.number());
        {
            let mut inner = logical.inner.lock();
            inner.session_id = channel.session_id();
            inner.direction = Some(channel.direction());
            inner.channel = Some(channel);
            inner.state = LogicalChannelState::Established;
        }
        logical
    }

    /// Open the channel towards the remote
    ///
    /// On failure nothing is sent and the state is left as it was.
    pub async fn open(
        &self,
        capability: Arc<dyn Capability>,
        session_id: u32,
        replacement_for: Option<u32>,
        role: Option<VideoRole>,
    ) -> H245Result<()> {
        let transition = {
            let mut inner = self.inner.lock();
            self.open_transition(&mut inner, capability, session_id, replacement_for, role)?
        };
        self.ctx.complete(transition).await
    }

    fn open_transition(
        &self,
        inner: &mut ChannelEntry,
        capability: Arc<dyn Capability>,
        session_id: u32,
        replacement_for: Option<u32>,
        role: Option<VideoRole>,
    ) -> H245Result<Transition> {
        match inner.state {
            LogicalChannelState::Released | LogicalChannelState::AwaitingRelease => {}
            state => return Err(H245Error::invalid_state("open logical channel", state)),
        }

        self.drop_channel(inner);

        let data_type = capability.encode_data_type(role).ok_or_else(|| {
            H245Error::open_failed(self.number, format!("{} cannot be encoded", capability.name()))
        })?;

        let mut channel = self
            .ctx
            .connection()
            .create_realtime_channel(capability.as_ref(), ChannelDirection::Transmitter, session_id, None)
            .ok_or_else(|| H245Error::open_failed(self.number, "no media channel for capability"))?;
        channel.set_number(self.number);

        let mut open = OpenLogicalChannel {
            channel_number: self.number.id,
            forward_parameters: ChannelParameters::new(data_type, session_id),
            reverse_parameters: None,
            replacement_for,
        };
        if !channel.on_sending_open(&mut open) {
            channel.cleanup_on_termination();
            return Err(H245Error::open_failed(self.number, "media channel refused open parameters"));
        }
        if !channel.open() {
            channel.cleanup_on_termination();
            return Err(H245Error::open_failed(self.number, "media channel failed to open"));
        }
        if !channel.set_initial_bandwidth() {
            channel.cleanup_on_termination();
            return Err(H245Error::open_failed(self.number, "insufficient bandwidth"));
        }

        inner.direction = Some(if open.is_bidirectional() {
            ChannelDirection::Bidirectional
        } else {
            channel.direction()
        });
        inner.channel = Some(channel);
        inner.capability = Some(capability);
        inner.session_id = session_id;
        inner.role = role;

        self.arm_timer();
        inner.state = LogicalChannelState::AwaitingEstablishment;
        debug!("Opening logical channel {} (session {})", self.number, session_id);
        Ok(Transition::send(H245Message::OpenLogicalChannel(open)))
    }

    /// Close the channel, or ask the remote to close it if it opened it
    pub async fn close(&self) -> H245Result<()> {
        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                LogicalChannelState::Established | LogicalChannelState::AwaitingEstablishment => {
                    self.close_transition(&mut inner)
                }
                state => {
                    trace!("Ignoring close of logical channel {} in {:?}", self.number, state);
                    Transition::none()
                }
            }
        };
        self.ctx.complete(transition).await
    }

    fn close_transition(&self, inner: &mut ChannelEntry) -> Transition {
        self.arm_timer();
        if self.number.is_from_remote() {
            inner.state = LogicalChannelState::AwaitingResponse;
            debug!("Requesting close of logical channel {}", self.number);
            Transition::send(H245Message::RequestChannelClose {
                channel_number: self.number.id,
                reason: RequestCloseReason::Normal,
            })
        } else {
            inner.state = LogicalChannelState::AwaitingRelease;
            debug!("Closing logical channel {}", self.number);
            Transition::send(H245Message::CloseLogicalChannel {
                channel_number: self.number.id,
                source: CloseSource::User,
            })
        }
    }

    /// Remote asked to open this channel towards us
    pub async fn handle_open(&self, open: &OpenLogicalChannel) -> H245Result<()> {
        let (transition, conflict) = {
            let mut inner = self.inner.lock();
            self.open_received(&mut inner, open)
        };
        let result = self.ctx.complete(transition).await;

        let Conflict::Resolve { mut channel, ack, conflict } = conflict else {
            return result;
        };

        debug!("Resolving channel conflict on session {}", conflict.session_id);
        self.ctx.connection().resolve_channel_conflict(&conflict);

        let transition = {
            let mut inner = self.inner.lock();
            if channel.start() {
                info!("Logical channel {} established after conflict resolution", self.number);
                inner.channel = Some(channel);
                inner.state = LogicalChannelState::Established;
                Transition::send(H245Message::OpenLogicalChannelAck(ack))
            } else {
                warn!("Logical channel {} still conflicts, rejecting", self.number);
                channel.cleanup_on_termination();
                self.release_locked(&mut inner);
                Transition::send(H245Message::OpenLogicalChannelReject {
                    channel_number: self.number.id,
                    cause: OpenRejectCause::Unspecified,
                })
            }
        };
        result.and(self.ctx.complete(transition).await)
    }

    fn open_received(&self, inner: &mut ChannelEntry, open: &OpenLogicalChannel) -> (Transition, Conflict) {
        self.ctx.timer.stop();
        self.drop_channel(inner);

        let reject = |cause| {
            Transition::send(H245Message::OpenLogicalChannelReject {
                channel_number: open.channel_number,
                cause,
            })
        };

        let mut channel = match self.ctx.connection().create_logical_channel(open, self.number) {
            Ok(channel) => channel,
            Err(cause) => {
                debug!("Refusing logical channel {}: {:?}", self.number, cause);
                self.release_locked(inner);
                return (reject(cause), Conflict::None);
            }
        };
        channel.set_number(self.number);

        let mut ack = OpenLogicalChannelAck::new(open.channel_number);
        channel.on_sending_open_ack(open, &mut ack);

        inner.session_id = open.forward_parameters.session_id;
        inner.capability = None;
        inner.role = open.forward_parameters.data_type.role;

        if open.is_bidirectional() {
            inner.direction = Some(ChannelDirection::Bidirectional);
            inner.channel = Some(channel);
            self.arm_timer();
            inner.state = LogicalChannelState::AwaitingConfirmation;
            return (Transition::send(H245Message::OpenLogicalChannelAck(ack)), Conflict::None);
        }

        inner.direction = Some(channel.direction());
        if channel.start() {
            info!("Logical channel {} established", self.number);
            inner.channel = Some(channel);
            inner.state = LogicalChannelState::Established;
            return (Transition::send(H245Message::OpenLogicalChannelAck(ack)), Conflict::None);
        }

        let master = self.master_slave.is_determined() && self.master_slave.is_master();
        let remote_application = self.ctx.connection().remote_application();
        if master && !self.ctx.env.policy.yield_on_channel_conflict(&remote_application) {
            debug!("Rejecting logical channel {}: master/slave conflict", self.number);
            channel.cleanup_on_termination();
            self.release_locked(inner);
            return (reject(OpenRejectCause::MasterSlaveConflict), Conflict::None);
        }

        let conflict = ChannelConflict {
            number: self.number,
            session_id: inner.session_id,
            direction: channel.direction(),
        };
        (Transition::none(), Conflict::Resolve { channel, ack, conflict })
    }

    pub async fn handle_open_ack(&self, ack: &OpenLogicalChannelAck) -> H245Result<()> {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.state != LogicalChannelState::AwaitingEstablishment {
                trace!("Ignoring OpenLogicalChannelAck for {} in {:?}", self.number, inner.state);
                return Ok(());
            }
            self.ctx.timer.stop();

            let accepted = inner
                .channel
                .as_mut()
                .map(|channel| channel.on_received_open_ack(ack))
                .unwrap_or(false);
            inner.state = LogicalChannelState::Established;

            if !accepted {
                warn!("Media channel rejected ack parameters for {}", self.number);
                self.close_transition(&mut inner)
            } else {
                let mut transition = Transition::none();
                let extended_video = inner
                    .capability
                    .as_ref()
                    .is_some_and(|capability| capability.media_type() == MediaType::ExtendedVideo);
                if extended_video {
                    transition.push(H245Message::LogicalChannelActive {
                        channel_number: self.number.id,
                    });
                }
                if inner.direction == Some(ChannelDirection::Bidirectional) {
                    transition.push(H245Message::OpenLogicalChannelConfirm {
                        channel_number: self.number.id,
                    });
                }

                let started = inner.channel.as_mut().is_some_and(|channel| channel.start());
                if started {
                    info!("Logical channel {} established", self.number);
                } else {
                    warn!("Media channel {} failed to start", self.number);
                    transition.messages.extend(self.close_transition(&mut inner).messages);
                }
                transition
            }
        };
        self.ctx.complete(transition).await
    }

    pub async fn handle_open_confirm(&self) -> H245Result<()> {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.state != LogicalChannelState::AwaitingConfirmation {
                trace!("Ignoring OpenLogicalChannelConfirm for {} in {:?}", self.number, inner.state);
                return Ok(());
            }
            self.ctx.timer.stop();
            inner.state = LogicalChannelState::Established;

            let started = inner.channel.as_mut().is_some_and(|channel| channel.start());
            if started {
                info!("Logical channel {} established", self.number);
                Transition::none()
            } else {
                warn!("Media channel {} failed to start", self.number);
                self.close_transition(&mut inner)
            }
        };
        self.ctx.complete(transition).await
    }

    pub async fn handle_reject(&self, cause: OpenRejectCause) -> H245Result<()> {
        let (transition, conflict) = {
            let mut inner = self.inner.lock();
            let outcome = match inner.state {
                LogicalChannelState::AwaitingEstablishment if cause == OpenRejectCause::MasterSlaveConflict => {
                    let conflict = ChannelConflict {
                        number: self.number,
                        session_id: inner.session_id,
                        direction: inner.direction.unwrap_or(ChannelDirection::Transmitter),
                    };
                    (Transition::none(), Some(conflict))
                }
                LogicalChannelState::Established => (Transition::fail("Reject established channel"), None),
                _ => (Transition::none(), None),
            };
            debug!("Logical channel {} rejected: {:?}", self.number, cause);
            if outcome.1.is_some() {
                // Released only once the conflict has been resolved
                self.ctx.timer.stop();
            } else {
                self.release_locked(&mut inner);
            }
            outcome
        };

        if let Some(conflict) = conflict {
            debug!("Resolving channel conflict on session {}", conflict.session_id);
            self.ctx.connection().resolve_channel_conflict(&conflict);
            self.release_locked(&mut self.inner.lock());
        }
        self.ctx.complete(transition).await
    }

    pub async fn handle_close(&self) -> H245Result<()> {
        let transition = {
            let mut inner = self.inner.lock();
            debug!("Remote closed logical channel {}", self.number);
            self.release_locked(&mut inner);
            Transition::send(H245Message::CloseLogicalChannelAck {
                channel_number: self.number.id,
            })
        };
        self.ctx.complete(transition).await
    }

    pub async fn handle_close_ack(&self) -> H245Result<()> {
        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                LogicalChannelState::Established => {
                    self.release_locked(&mut inner);
                    Transition::fail("Close Ack established channel")
                }
                LogicalChannelState::AwaitingRelease => {
                    debug!("Logical channel {} closed", self.number);
                    self.release_locked(&mut inner);
                    Transition::none()
                }
                state => {
                    trace!("Ignoring CloseLogicalChannelAck for {} in {:?}", self.number, state);
                    Transition::none()
                }
            }
        };
        self.ctx.complete(transition).await
    }

    /// Remote asks us to close a channel we opened
    ///
    /// With [`RequestCloseReason::Reopen`] the channel is opened again with
    /// the same capability and session right after the close is sent.
    pub async fn handle_request_close(&self, reason: RequestCloseReason) -> H245Result<()> {
        let (transition, reopen) = {
            let mut inner = self.inner.lock();
            if inner.state != LogicalChannelState::Established {
                trace!("Ignoring RequestChannelClose for {} in {:?}", self.number, inner.state);
                return Ok(());
            }

            if !self.ctx.connection().accept_close_request(self.number, reason) {
                debug!("Refusing close request for {}", self.number);
                (
                    Transition::send(H245Message::RequestChannelCloseReject {
                        channel_number: self.number.id,
                    }),
                    Ok(()),
                )
            } else {
                let mut transition = Transition::send(H245Message::RequestChannelCloseAck {
                    channel_number: self.number.id,
                });
                transition.messages.extend(self.close_transition(&mut inner).messages);

                let mut reopen = Ok(());
                if reason == RequestCloseReason::Reopen {
                    if let Some(capability) = inner.capability.clone() {
                        let (session_id, role) = (inner.session_id, inner.role);
                        match self.open_transition(&mut inner, capability, session_id, None, role) {
                            Ok(open) => transition.messages.extend(open.messages),
                            Err(e) => {
                                warn!("Reopening logical channel {} failed: {}", self.number, e);
                                reopen = Err(e);
                            }
                        }
                    }
                }
                (transition, reopen)
            }
        };
        self.ctx.complete(transition).await.and(reopen)
    }

    pub async fn handle_request_close_ack(&self) -> H245Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != LogicalChannelState::AwaitingResponse {
            trace!("Ignoring RequestChannelCloseAck for {} in {:?}", self.number, inner.state);
            return Ok(());
        }
        debug!("Remote agreed to close logical channel {}", self.number);
        self.release_locked(&mut inner);
        Ok(())
    }

    pub async fn handle_request_close_reject(&self) -> H245Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != LogicalChannelState::AwaitingResponse {
            trace!("Ignoring RequestChannelCloseReject for {} in {:?}", self.number, inner.state);
            return Ok(());
        }
        debug!("Remote refused to close logical channel {}", self.number);
        self.ctx.timer.stop();
        inner.state = LogicalChannelState::Established;
        Ok(())
    }

    pub async fn handle_request_close_release(&self) -> H245Result<()> {
        let mut inner = self.inner.lock();
        if inner.state == LogicalChannelState::Released {
            trace!("Ignoring RequestChannelCloseRelease for released {}", self.number);
            return Ok(());
        }
        self.ctx.timer.stop();
        inner.state = LogicalChannelState::Established;
        Ok(())
    }

    pub async fn handle_timeout(&self) -> H245Result<()> {
        let transition = self.timeout_transition(None);
        self.ctx.complete(transition).await
    }

    async fn on_timer_expired(&self, generation: u64) -> H245Result<()> {
        let transition = self.timeout_transition(Some(generation));
        self.ctx.complete(transition).await
    }

    fn timeout_transition(&self, generation: Option<u64>) -> Transition {
        let mut inner = self.inner.lock();
        if let Some(generation) = generation {
            if !self.ctx.timer.is_current(generation) {
                trace!("Ignoring stale timer for logical channel {}", self.number);
                return Transition::none();
            }
        }

        let transition = match inner.state {
            LogicalChannelState::AwaitingEstablishment => Transition::send(H245Message::CloseLogicalChannel {
                channel_number: self.number.id,
                source: CloseSource::Lcse,
            }),
            LogicalChannelState::AwaitingResponse => Transition::send(H245Message::RequestChannelCloseRelease {
                channel_number: self.number.id,
            }),
            _ => Transition::none(),
        };
        warn!("Logical channel {} timed out in {:?}", self.number, inner.state);
        self.release_locked(&mut inner);
        transition.and_fail("Timeout")
    }

    /// Stop the timer and drop the media channel
    pub fn release(&self) {
        let mut inner = self.inner.lock();
        self.release_locked(&mut inner);
    }

    fn release_locked(&self, inner: &mut ChannelEntry) {
        self.ctx.timer.stop();
        self.drop_channel(inner);
        inner.state = LogicalChannelState::Released;
    }

    fn drop_channel(&self, inner: &mut ChannelEntry) {
        if let Some(mut channel) = inner.channel.take() {
            trace!("Dropping media channel {}", self.number);
            channel.cleanup_on_termination();
        }
    }

    fn arm_timer(&self) {
        let me = self.me.clone();
        self.ctx
            .timer
            .arm(self.ctx.config().logical_channel_timeout, move |generation| async move {
                if let Some(channel) = me.upgrade() {
                    if let Err(e) = channel.on_timer_expired(generation).await {
                        debug!("Logical channel timeout handling failed: {}", e);
                    }
                }
            });
    }

    pub fn number(&self) -> ChannelNumber {
        self.number
    }

    pub fn state(&self) -> LogicalChannelState {
        self.inner.lock().state
    }

    pub fn session_id(&self) -> u32 {
        self.inner.lock().session_id
    }

    /// Capability the channel was opened with; `None` for remote channels
    pub fn capability(&self) -> Option<Arc<dyn Capability>> {
        self.inner.lock().capability.clone()
    }

    pub fn direction(&self) -> Option<ChannelDirection> {
        self.inner.lock().direction
    }

    pub fn is_established(&self) -> bool {
        self.inner.lock().state == LogicalChannelState::Established
    }

    /// Run `f` against the owned media channel while holding the channel lock
    pub fn with_channel<R>(&self, f: impl FnOnce(&mut dyn MediaChannel) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        inner.channel.as_mut().map(|channel| f(channel.as_mut()))
    }
}

impl std::fmt::Debug for LogicalChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalChannel")
            .field("number", &self.number)
            .field("state", &self.state())
            .finish()
    }
}
