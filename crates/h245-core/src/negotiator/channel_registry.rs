//! Logical channel registry
//!
//! Maps `(number, origin)` to the [`LogicalChannel`] negotiating it and hands
//! out local channel numbers. The registry lock only guards the map; every
//! dispatch clones the entry's `Arc` and runs with the lock released, so
//! distinct channels never contend.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::context::NegotiatorEnvironment;
use super::logical_channel::{LogicalChannel, LogicalChannelState};
use super::master_slave::MasterSlaveDetermination;
use crate::capability::Capability;
use crate::channel::MediaChannel;
use crate::errors::{H245Error, H245Result, ProtocolErrorKind};
use crate::protocol::{
    ChannelNumber, OpenLogicalChannel, OpenLogicalChannelAck, OpenRejectCause, Origin, RequestCloseReason,
    VideoRole,
};

struct RegistryInner {
    channels: HashMap<ChannelNumber, Arc<LogicalChannel>>,
    last_channel_number: u32,
}

/// All logical channels of one call
pub struct LogicalChannelRegistry {
    env: NegotiatorEnvironment,
    master_slave: Arc<MasterSlaveDetermination>,
    inner: Mutex<RegistryInner>,
}

impl LogicalChannelRegistry {
    pub fn new(env: NegotiatorEnvironment, master_slave: Arc<MasterSlaveDetermination>) -> Self {
        let last_channel_number = env.config.channel_number_base;
        Self {
            env,
            master_slave,
            inner: Mutex::new(RegistryInner {
                channels: HashMap::new(),
                last_channel_number,
            }),
        }
    }

    /// Register a media channel that was set up outside of H.245 signalling
    pub fn add(&self, channel: Box<dyn MediaChannel>) -> ChannelNumber {
        let logical = LogicalChannel::established(self.env.clone(), self.master_slave.clone(), channel);
        let number = logical.number();
        let previous = self.inner.lock().channels.insert(number, logical);
        if let Some(previous) = previous {
            warn!("Replacing logical channel {} already in the registry", number);
            previous.release();
        }
        number
    }

    /// Open a new channel towards the remote
    ///
    /// The entry is kept on failure so its number can be reused.
    pub async fn open(
        &self,
        capability: Arc<dyn Capability>,
        session_id: u32,
        replacement_for: Option<u32>,
        role: Option<VideoRole>,
    ) -> H245Result<ChannelNumber> {
        let channel = {
            let mut inner = self.inner.lock();
            let number = self.allocate_number(&mut inner)?;
            let channel = LogicalChannel::new(self.env.clone(), self.master_slave.clone(), number);
            inner.channels.insert(number, channel.clone());
            channel
        };

        let number = channel.number();
        debug!("Allocated logical channel {} for session {}", number, session_id);
        channel.open(capability, session_id, replacement_for, role).await?;
        Ok(number)
    }

    fn allocate_number(&self, inner: &mut RegistryInner) -> H245Result<ChannelNumber> {
        let base = self.env.config.channel_number_base;
        let max = self.env.config.max_channel_number;

        for _ in base..max {
            inner.last_channel_number = if inner.last_channel_number >= max {
                base + 1
            } else {
                inner.last_channel_number + 1
            };
            let number = ChannelNumber::local(inner.last_channel_number);
            let in_use = inner
                .channels
                .get(&number)
                .is_some_and(|channel| channel.state() != LogicalChannelState::Released);
            if !in_use {
                return Ok(number);
            }
        }
        Err(H245Error::open_failed(
            ChannelNumber::local(0),
            format!("no free channel number in {}..={}", base + 1, max),
        ))
    }

    /// Close a channel, or request the remote to close it if `from_remote`
    pub async fn close(&self, id: u32, from_remote: bool) -> H245Result<()> {
        let number = ChannelNumber::new(id, if from_remote { Origin::Remote } else { Origin::Local });
        match self.find(number) {
            Some(channel) => channel.close().await,
            None => {
                self.unknown("Close unknown", number)?;
                Err(H245Error::UnknownChannel(number))
            }
        }
    }

    pub async fn handle_open(&self, open: &OpenLogicalChannel) -> H245Result<()> {
        let number = ChannelNumber::remote(open.channel_number);
        let channel = {
            let mut inner = self.inner.lock();
            inner
                .channels
                .entry(number)
                .or_insert_with(|| {
                    trace!("Creating entry for remote logical channel {}", number);
                    LogicalChannel::new(self.env.clone(), self.master_slave.clone(), number)
                })
                .clone()
        };
        channel.handle_open(open).await
    }

    pub async fn handle_open_ack(&self, ack: &OpenLogicalChannelAck) -> H245Result<()> {
        let number = ChannelNumber::local(ack.channel_number);
        match self.find(number) {
            Some(channel) => channel.handle_open_ack(ack).await,
            None => self.unknown("Ack unknown", number),
        }
    }

    pub async fn handle_open_confirm(&self, id: u32) -> H245Result<()> {
        let number = ChannelNumber::remote(id);
        match self.find(number) {
            Some(channel) => channel.handle_open_confirm().await,
            None => self.unknown("Confirm unknown", number),
        }
    }

    pub async fn handle_reject(&self, id: u32, cause: OpenRejectCause) -> H245Result<()> {
        let number = ChannelNumber::local(id);
        match self.find(number) {
            Some(channel) => channel.handle_reject(cause).await,
            None => self.unknown("Reject unknown", number),
        }
    }

    pub async fn handle_close(&self, id: u32) -> H245Result<()> {
        let number = ChannelNumber::remote(id);
        match self.find(number) {
            Some(channel) => channel.handle_close().await,
            None => self.unknown("Close unknown", number),
        }
    }

    pub async fn handle_close_ack(&self, id: u32) -> H245Result<()> {
        let number = ChannelNumber::local(id);
        match self.find(number) {
            Some(channel) => channel.handle_close_ack().await,
            None => self.unknown("Close Ack unknown", number),
        }
    }

    pub async fn handle_request_close(&self, id: u32, reason: RequestCloseReason) -> H245Result<()> {
        let number = ChannelNumber::local(id);
        match self.find(number) {
            Some(channel) => channel.handle_request_close(reason).await,
            None => self.unknown("Request Close unknown", number),
        }
    }

    pub async fn handle_request_close_ack(&self, id: u32) -> H245Result<()> {
        let number = ChannelNumber::remote(id);
        match self.find(number) {
            Some(channel) => channel.handle_request_close_ack().await,
            None => self.unknown("Request Close Ack unknown", number),
        }
    }

    pub async fn handle_request_close_reject(&self, id: u32) -> H245Result<()> {
        let number = ChannelNumber::remote(id);
        match self.find(number) {
            Some(channel) => channel.handle_request_close_reject().await,
            None => self.unknown("Request Close Reject unknown", number),
        }
    }

    pub async fn handle_request_close_release(&self, id: u32) -> H245Result<()> {
        let number = ChannelNumber::local(id);
        match self.find(number) {
            Some(channel) => channel.handle_request_close_release().await,
            None => self.unknown("Request Close Release unknown", number),
        }
    }

    fn unknown(&self, reason: &str, number: ChannelNumber) -> H245Result<()> {
        warn!("{} for logical channel {}", reason, number);
        if self
            .env
            .connection
            .report_protocol_error(ProtocolErrorKind::LogicalChannel, reason)
        {
            Ok(())
        } else {
            Err(H245Error::protocol(ProtocolErrorKind::LogicalChannel, reason))
        }
    }

    pub fn channels(&self) -> Vec<Arc<LogicalChannel>> {
        self.inner.lock().channels.values().cloned().collect()
    }

    pub fn find(&self, number: ChannelNumber) -> Option<Arc<LogicalChannel>> {
        self.inner.lock().channels.get(&number).cloned()
    }

    /// The live channel of the given origin carrying `session_id`
    pub fn find_by_session(&self, session_id: u32, origin: Origin) -> Option<Arc<LogicalChannel>> {
        // Entries are inspected without the registry lock held
        self.channels().into_iter().find(|channel| {
            channel.number().origin == origin
                && channel.state() != LogicalChannelState::Released
                && channel.session_id() == session_id
        })
    }

    /// Remove one channel, releasing its media channel
    pub fn remove(&self, number: ChannelNumber) -> Option<Arc<LogicalChannel>> {
        let channel = self.inner.lock().channels.remove(&number)?;
        channel.release();
        Some(channel)
    }

    /// Release every channel and empty the registry
    pub fn remove_all(&self) {
        let channels: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.channels.drain().map(|(_, channel)| channel).collect()
        };
        debug!("Releasing {} logical channels", channels.len());
        for channel in channels {
            channel.release();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().channels.is_empty()
    }
}
