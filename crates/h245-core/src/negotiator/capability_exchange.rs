//! Capability exchange (H.245 §8.3)
//!
//! Outgoing and incoming sets are independent: `state` tracks the set we sent,
//! `received_capabilities` the last set we accepted from the remote.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::context::{NegotiatorContext, NegotiatorEnvironment, Transition};
use crate::capability::RemoteCapabilitySet;
use crate::connection::{CallEndReason, CapabilityVerdict};
use crate::errors::{H245Result, ProtocolErrorKind};
use crate::protocol::{next_sequence_number, CapabilitySetRejectCause, H245Message, TerminalCapabilitySet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityExchangeState {
    Idle,
    /// Our set is outstanding
    InProgress,
    /// The remote acknowledged our set
    Sent,
}

#[derive(Debug)]
struct ExchangeState {
    state: CapabilityExchangeState,
    out_sequence: u8,
    in_sequence: Option<u8>,
    received_capabilities: bool,
    remote: Option<RemoteCapabilitySet>,
}

/// Capability exchange signalling entity
pub struct CapabilitySetExchange {
    ctx: NegotiatorContext,
    inner: Mutex<ExchangeState>,
    me: Weak<Self>,
}

impl CapabilitySetExchange {
    pub fn new(env: NegotiatorEnvironment) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            ctx: NegotiatorContext::new(env, ProtocolErrorKind::CapabilityExchange, "capability exchange"),
            inner: Mutex::new(ExchangeState {
                state: CapabilityExchangeState::Idle,
                out_sequence: 0,
                in_sequence: None,
                received_capabilities: false,
                remote: None,
            }),
            me: me.clone(),
        })
    }

    /// Send our capability set
    ///
    /// An `empty` set asks the remote to stop transmitting.
    pub async fn start(&self, renegotiate: bool, empty: bool) -> H245Result<()> {
        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                CapabilityExchangeState::InProgress => {
                    trace!("Capability set already outstanding");
                    return Ok(());
                }
                CapabilityExchangeState::Sent if !renegotiate => {
                    trace!("Capability set already sent");
                    return Ok(());
                }
                _ => {}
            }

            inner.out_sequence = next_sequence_number(inner.out_sequence);
            self.arm_timer();
            inner.state = CapabilityExchangeState::InProgress;

            let set = self
                .ctx
                .config()
                .local_capabilities
                .to_capability_set(inner.out_sequence, empty);
            debug!(
                "Sending TerminalCapabilitySet seq={} ({} entries)",
                set.sequence_number,
                set.capability_table.len()
            );
            Transition::send(H245Message::TerminalCapabilitySet(set))
        };
        self.ctx.complete(transition).await
    }

    pub async fn handle_incoming(&self, set: TerminalCapabilitySet) -> H245Result<()> {
        let sequence_number = set.sequence_number;
        let (transition, rejected) = {
            let mut inner = self.inner.lock();
            if inner.in_sequence == Some(sequence_number) {
                trace!("Ignoring duplicate TerminalCapabilitySet seq={}", sequence_number);
                return Ok(());
            }
            inner.in_sequence = Some(sequence_number);

            let remote = RemoteCapabilitySet::from_message(&set);
            match self.ctx.connection().arbitrate_capability_set(&remote) {
                CapabilityVerdict::Accept => {
                    info!(
                        "Accepted remote capability set seq={} ({} entries)",
                        sequence_number,
                        remote.table.len()
                    );
                    inner.received_capabilities = true;
                    inner.remote = Some(remote);
                    (
                        Transition::send(H245Message::TerminalCapabilitySetAck { sequence_number }),
                        None,
                    )
                }
                CapabilityVerdict::Reject(cause) => {
                    warn!("Rejecting remote capability set seq={}: {:?}", sequence_number, cause);
                    (
                        Transition::send(H245Message::TerminalCapabilitySetReject { sequence_number, cause }),
                        Some(cause),
                    )
                }
            }
        };

        let result = self.ctx.complete(transition).await;
        if let Some(cause) = rejected {
            self.ctx.connection().clear_call(CallEndReason::CapabilityExchange(cause));
        }
        result
    }

    pub async fn handle_ack(&self, sequence_number: u8) -> H245Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != CapabilityExchangeState::InProgress || inner.out_sequence != sequence_number {
            trace!(
                "Ignoring TerminalCapabilitySetAck seq={} (state {:?}, expecting {})",
                sequence_number,
                inner.state,
                inner.out_sequence
            );
            return Ok(());
        }
        self.ctx.timer.stop();
        inner.state = CapabilityExchangeState::Sent;
        debug!("Remote acknowledged capability set seq={}", sequence_number);
        Ok(())
    }

    pub async fn handle_reject(&self, sequence_number: u8, cause: CapabilitySetRejectCause) -> H245Result<()> {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.state != CapabilityExchangeState::InProgress || inner.out_sequence != sequence_number {
                trace!("Ignoring TerminalCapabilitySetReject seq={}", sequence_number);
                return Ok(());
            }
            self.ctx.timer.stop();
            inner.state = CapabilityExchangeState::Idle;
            debug!("Remote rejected capability set seq={}: {:?}", sequence_number, cause);
            Transition::fail("Rejected")
        };
        self.ctx.complete(transition).await
    }

    /// Remote gave up waiting for our answer to its set
    pub async fn handle_release(&self) -> H245Result<()> {
        let transition = {
            let mut inner = self.inner.lock();
            inner.received_capabilities = false;
            inner.remote = None;
            Transition::fail("Aborted")
        };
        self.ctx.complete(transition).await
    }

    pub async fn handle_timeout(&self) -> H245Result<()> {
        let transition = self.timeout_transition(None);
        self.ctx.complete(transition).await
    }

    async fn on_timer_expired(&self, generation: u64) -> H245Result<()> {
        let transition = self.timeout_transition(Some(generation));
        self.ctx.complete(transition).await
    }

    // The state is left alone so a late ack still completes the exchange
    fn timeout_transition(&self, generation: Option<u64>) -> Transition {
        let _inner = self.inner.lock();
        if let Some(generation) = generation {
            if !self.ctx.timer.is_current(generation) {
                trace!("Ignoring stale capability exchange timer");
                return Transition::none();
            }
        }
        self.ctx.timer.stop();
        Transition::send(H245Message::TerminalCapabilitySetRelease).and_fail("Timeout")
    }

    fn arm_timer(&self) {
        let me = self.me.clone();
        self.ctx
            .timer
            .arm(self.ctx.config().capability_exchange_timeout, move |generation| async move {
                if let Some(machine) = me.upgrade() {
                    if let Err(e) = machine.on_timer_expired(generation).await {
                        debug!("Capability exchange timeout handling failed: {}", e);
                    }
                }
            });
    }

    pub fn state(&self) -> CapabilityExchangeState {
        self.inner.lock().state
    }

    pub fn has_sent_capabilities(&self) -> bool {
        self.inner.lock().state == CapabilityExchangeState::Sent
    }

    pub fn has_received_capabilities(&self) -> bool {
        self.inner.lock().received_capabilities
    }

    pub fn out_sequence_number(&self) -> u8 {
        self.inner.lock().out_sequence
    }

    /// The last capability set accepted from the remote
    pub fn remote_capabilities(&self) -> Option<RemoteCapabilitySet> {
        self.inner.lock().remote.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityEntry, CapabilityTable};
    use crate::config::NegotiationConfig;
    use crate::negotiator::testing::environment;
    use crate::protocol::MediaType;

    fn config() -> NegotiationConfig {
        NegotiationConfig::new(50).with_capabilities(
            CapabilityTable::new().with_entry(CapabilityEntry::new(1, MediaType::Audio, "G.711-ALaw-64k")),
        )
    }

    fn remote_set(sequence_number: u8) -> TerminalCapabilitySet {
        CapabilityTable::new()
            .with_entry(CapabilityEntry::new(7, MediaType::Video, "H.264"))
            .to_capability_set(sequence_number, false)
    }

    #[tokio::test]
    async fn test_start_sends_local_table() {
        let (env, connection) = environment(config());
        let tcs = CapabilitySetExchange::new(env);

        tcs.start(false, false).await.unwrap();
        assert_eq!(tcs.state(), CapabilityExchangeState::InProgress);
        let sent = connection.take_sent();
        match sent.as_slice() {
            [H245Message::TerminalCapabilitySet(set)] => {
                assert_eq!(set.sequence_number, 1);
                assert_eq!(set.capability_table[0].name, "G.711-ALaw-64k");
            }
            other => panic!("unexpected messages {:?}", other),
        }

        // Outstanding set is not resent
        tcs.start(true, false).await.unwrap();
        assert!(connection.take_sent().is_empty());

        tcs.handle_ack(1).await.unwrap();
        assert!(tcs.has_sent_capabilities());

        tcs.start(false, false).await.unwrap();
        assert!(connection.take_sent().is_empty());
        tcs.start(true, true).await.unwrap();
        match connection.take_sent().as_slice() {
            [H245Message::TerminalCapabilitySet(set)] => assert!(set.is_empty()),
            other => panic!("unexpected messages {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sequence_number_wraps_after_256_exchanges() {
        let (env, _connection) = environment(config());
        let tcs = CapabilitySetExchange::new(env);
        let initial = tcs.out_sequence_number();

        for _ in 0..256 {
            tcs.start(true, false).await.unwrap();
            tcs.handle_ack(tcs.out_sequence_number()).await.unwrap();
        }
        assert_eq!(tcs.out_sequence_number(), initial);
    }

    #[tokio::test]
    async fn test_mismatched_ack_ignored() {
        let (env, _connection) = environment(config());
        let tcs = CapabilitySetExchange::new(env);

        tcs.handle_ack(1).await.unwrap();
        assert_eq!(tcs.state(), CapabilityExchangeState::Idle);

        tcs.start(false, false).await.unwrap();
        tcs.handle_ack(9).await.unwrap();
        assert_eq!(tcs.state(), CapabilityExchangeState::InProgress);
    }

    #[tokio::test]
    async fn test_duplicate_set_acknowledged_once() {
        let (env, connection) = environment(config());
        let tcs = CapabilitySetExchange::new(env);

        tcs.handle_incoming(remote_set(3)).await.unwrap();
        tcs.handle_incoming(remote_set(3)).await.unwrap();

        assert_eq!(
            connection.take_sent(),
            vec![H245Message::TerminalCapabilitySetAck { sequence_number: 3 }]
        );
        assert!(tcs.has_received_capabilities());
        let remote = tcs.remote_capabilities().unwrap();
        assert!(remote.can_receive(MediaType::Video, "H.264"));
    }

    #[tokio::test]
    async fn test_rejected_set_clears_call() {
        let (env, connection) = environment(config());
        *connection.verdict.lock() = CapabilityVerdict::Reject(CapabilitySetRejectCause::UndefinedTableEntryUsed);
        let tcs = CapabilitySetExchange::new(env);

        tcs.handle_incoming(remote_set(4)).await.unwrap();
        assert_eq!(
            connection.take_sent(),
            vec![H245Message::TerminalCapabilitySetReject {
                sequence_number: 4,
                cause: CapabilitySetRejectCause::UndefinedTableEntryUsed,
            }]
        );
        assert!(!tcs.has_received_capabilities());
        assert_eq!(
            *connection.cleared.lock(),
            vec![CallEndReason::CapabilityExchange(CapabilitySetRejectCause::UndefinedTableEntryUsed)]
        );
    }

    #[tokio::test]
    async fn test_reject_of_our_set_is_fatal() {
        let (env, connection) = environment(config());
        let tcs = CapabilitySetExchange::new(env);

        tcs.start(false, false).await.unwrap();
        tcs.handle_reject(2, CapabilitySetRejectCause::Unspecified).await.unwrap();
        assert!(connection.errors.lock().is_empty());

        tcs.handle_reject(1, CapabilitySetRejectCause::Unspecified).await.unwrap();
        assert_eq!(tcs.state(), CapabilityExchangeState::Idle);
        assert_eq!(connection.error_reasons(), vec!["Rejected"]);
    }

    #[tokio::test]
    async fn test_timeout_sends_release_and_keeps_state() {
        let (env, connection) = environment(config());
        let tcs = CapabilitySetExchange::new(env);

        tcs.start(false, false).await.unwrap();
        connection.take_sent();
        tcs.handle_timeout().await.unwrap();

        assert_eq!(connection.take_sent(), vec![H245Message::TerminalCapabilitySetRelease]);
        assert_eq!(connection.error_reasons(), vec!["Timeout"]);
        assert_eq!(tcs.state(), CapabilityExchangeState::InProgress);
    }

    #[tokio::test]
    async fn test_release_forgets_remote_set() {
        let (env, connection) = environment(config());
        let tcs = CapabilitySetExchange::new(env);

        tcs.handle_incoming(remote_set(1)).await.unwrap();
        tcs.handle_release().await.unwrap();
        assert!(!tcs.has_received_capabilities());
        assert!(tcs.remote_capabilities().is_none());
        assert_eq!(connection.error_reasons(), vec!["Aborted"]);
    }
}
