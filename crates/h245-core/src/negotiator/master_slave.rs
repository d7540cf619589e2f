//! Master/slave determination (H.245 §8.2)
//!
//! ```text
//!            start()                    remote request
//!   Idle ─────────────▶ Outgoing ───────────────────────▶ Incoming
//!    ▲                    │  ack (adopt + ack back)          │ ack (verify)
//!    └────────────────────┴──────────────────────────────────┘
//! ```
//!
//! The terminal type decides first; equal terminal types fall back to the
//! 24-bit random determination numbers compared modulo 2²⁴.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, trace};

use super::context::{NegotiatorContext, NegotiatorEnvironment, Transition};
use crate::errors::{H245Result, ProtocolErrorKind};
use crate::protocol::{
    H245Message, MasterSlaveRejectCause, MasterSlaveStatus, DETERMINATION_HALF_RANGE,
    DETERMINATION_NUMBER_MASK,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterSlaveState {
    Idle,
    /// Our request is outstanding
    Outgoing,
    /// We answered the remote's request and wait for its ack
    Incoming,
}

/// Decide the local role from both terminal types and determination numbers
pub fn determine_status(
    local_terminal_type: u8,
    local_number: u32,
    remote_terminal_type: u8,
    remote_number: u32,
) -> MasterSlaveStatus {
    if remote_terminal_type < local_terminal_type {
        return MasterSlaveStatus::Master;
    }
    if remote_terminal_type > local_terminal_type {
        return MasterSlaveStatus::Slave;
    }

    let diff = remote_number.wrapping_sub(local_number) & DETERMINATION_NUMBER_MASK;
    if diff == 0 || diff == DETERMINATION_HALF_RANGE {
        MasterSlaveStatus::Indeterminate
    } else if diff < DETERMINATION_HALF_RANGE {
        MasterSlaveStatus::Master
    } else {
        MasterSlaveStatus::Slave
    }
}

#[derive(Debug)]
struct DeterminationState {
    state: MasterSlaveState,
    status: MasterSlaveStatus,
    determination_number: u32,
    retry_count: u32,
}

/// Master/slave determination signalling entity
pub struct MasterSlaveDetermination {
    ctx: NegotiatorContext,
    inner: Mutex<DeterminationState>,
    me: Weak<Self>,
}

impl MasterSlaveDetermination {
    pub fn new(env: NegotiatorEnvironment) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            ctx: NegotiatorContext::new(env, ProtocolErrorKind::MasterSlaveDetermination, "master/slave"),
            inner: Mutex::new(DeterminationState {
                state: MasterSlaveState::Idle,
                status: MasterSlaveStatus::Indeterminate,
                determination_number: 0,
                retry_count: 0,
            }),
            me: me.clone(),
        })
    }

    /// Begin determination
    ///
    /// Does nothing while a determination is already running unless
    /// `renegotiate` is set.
    pub async fn start(&self, renegotiate: bool) -> H245Result<()> {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.state != MasterSlaveState::Idle && !renegotiate {
                trace!("Master/slave determination already in progress ({:?})", inner.state);
                return Ok(());
            }
            inner.retry_count = 1;
            self.restart(&mut inner)
        };
        self.ctx.complete(transition).await
    }

    fn restart(&self, inner: &mut DeterminationState) -> Transition {
        inner.determination_number = rand::thread_rng().gen_range(0..=DETERMINATION_NUMBER_MASK);
        self.arm_timer();
        inner.state = MasterSlaveState::Outgoing;

        if self.ctx.config().force_slave {
            debug!("Forced slave: waiting for remote MasterSlaveDetermination");
            return Transition::none();
        }

        debug!(
            "Sending MasterSlaveDetermination (attempt {}, number {:#08x})",
            inner.retry_count, inner.determination_number
        );
        Transition::send(H245Message::MasterSlaveDetermination {
            terminal_type: self.ctx.config().terminal_type,
            determination_number: inner.determination_number,
        })
    }

    /// Handle the remote's determination request
    pub async fn handle_incoming(&self, remote_terminal_type: u8, remote_number: u32) -> H245Result<()> {
        let transition = {
            let mut inner = self.inner.lock();
            self.incoming_transition(&mut inner, remote_terminal_type, remote_number)
        };
        self.ctx.complete(transition).await
    }

    fn incoming_transition(
        &self,
        inner: &mut DeterminationState,
        remote_terminal_type: u8,
        remote_number: u32,
    ) -> Transition {
        if inner.state == MasterSlaveState::Incoming {
            self.ctx.timer.stop();
            inner.state = MasterSlaveState::Idle;
            return Transition::fail("Duplicate MasterSlaveDetermination");
        }

        if inner.state == MasterSlaveState::Idle {
            inner.determination_number = rand::thread_rng().gen_range(0..=DETERMINATION_NUMBER_MASK);
        }

        let config = self.ctx.config();
        let new_status = if config.force_slave {
            MasterSlaveStatus::Slave
        } else {
            determine_status(
                config.terminal_type,
                inner.determination_number,
                remote_terminal_type,
                remote_number & DETERMINATION_NUMBER_MASK,
            )
        };

        match new_status {
            MasterSlaveStatus::Indeterminate if inner.state == MasterSlaveState::Outgoing => {
                inner.retry_count += 1;
                if inner.retry_count < config.master_slave_retries {
                    debug!("Master/slave determination indeterminate, retrying");
                    self.restart(inner)
                } else {
                    self.ctx.timer.stop();
                    inner.state = MasterSlaveState::Idle;
                    Transition::fail("Retries exceeded")
                }
            }
            MasterSlaveStatus::Indeterminate => {
                debug!("Identical determination numbers, rejecting remote request");
                Transition::send(H245Message::MasterSlaveDeterminationReject {
                    cause: MasterSlaveRejectCause::IdenticalNumbers,
                })
            }
            decided => {
                inner.status = decided;
                self.arm_timer();
                inner.state = MasterSlaveState::Incoming;
                debug!("Local endpoint decided {} (remote terminal type {})", decided, remote_terminal_type);
                Transition::send(H245Message::MasterSlaveDeterminationAck { decision: decided })
            }
        }
    }

    /// Handle the remote's ack, carrying the role the remote has taken
    pub async fn handle_ack(&self, decision: MasterSlaveStatus) -> H245Result<()> {
        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                MasterSlaveState::Idle => {
                    trace!("Ignoring MasterSlaveDeterminationAck while idle");
                    Transition::none()
                }
                _ if decision == MasterSlaveStatus::Indeterminate => {
                    self.ctx.timer.stop();
                    inner.state = MasterSlaveState::Idle;
                    Transition::fail("Invalid MasterSlaveDeterminationAck")
                }
                MasterSlaveState::Outgoing => {
                    self.ctx.timer.stop();
                    inner.status = decision.opposite();
                    inner.state = MasterSlaveState::Idle;
                    info!("Master/slave determination complete: local endpoint is {}", inner.status);
                    Transition::send(H245Message::MasterSlaveDeterminationAck {
                        decision: inner.status,
                    })
                }
                MasterSlaveState::Incoming => {
                    self.ctx.timer.stop();
                    inner.state = MasterSlaveState::Idle;
                    if decision.opposite() != inner.status {
                        Transition::fail("Master/Slave mismatch")
                    } else {
                        info!("Master/slave determination complete: local endpoint is {}", inner.status);
                        Transition::none()
                    }
                }
            }
        };
        self.ctx.complete(transition).await
    }

    pub async fn handle_reject(&self, cause: MasterSlaveRejectCause) -> H245Result<()> {
        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                MasterSlaveState::Idle => Transition::none(),
                MasterSlaveState::Outgoing if cause == MasterSlaveRejectCause::IdenticalNumbers => {
                    inner.retry_count += 1;
                    if inner.retry_count < self.ctx.config().master_slave_retries {
                        self.restart(&mut inner)
                    } else {
                        self.ctx.timer.stop();
                        inner.state = MasterSlaveState::Idle;
                        Transition::fail("Retries exceeded")
                    }
                }
                _ => {
                    self.ctx.timer.stop();
                    inner.state = MasterSlaveState::Idle;
                    Transition::fail("Rejected")
                }
            }
        };
        self.ctx.complete(transition).await
    }

    pub async fn handle_release(&self) -> H245Result<()> {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.state == MasterSlaveState::Idle {
                Transition::none()
            } else {
                self.ctx.timer.stop();
                inner.state = MasterSlaveState::Idle;
                Transition::fail("Aborted")
            }
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

    fn timeout_transition(&self, generation: Option<u64>) -> Transition {
        let mut inner = self.inner.lock();
        if let Some(generation) = generation {
            if !self.ctx.timer.is_current(generation) {
                trace!("Ignoring stale master/slave timer");
                return Transition::none();
            }
        }

        let transition = match inner.state {
            MasterSlaveState::Outgoing => Transition::send(H245Message::MasterSlaveDeterminationRelease),
            MasterSlaveState::Incoming | MasterSlaveState::Idle => Transition::none(),
        };
        self.ctx.timer.stop();
        inner.state = MasterSlaveState::Idle;
        transition.and_fail("Timeout")
    }

    fn arm_timer(&self) {
        let me = self.me.clone();
        self.ctx
            .timer
            .arm(self.ctx.config().master_slave_timeout, move |generation| async move {
                if let Some(machine) = me.upgrade() {
                    if let Err(e) = machine.on_timer_expired(generation).await {
                        debug!("Master/slave timeout handling failed: {}", e);
                    }
                }
            });
    }

    pub fn is_master(&self) -> bool {
        self.inner.lock().status == MasterSlaveStatus::Master
    }

    /// Determination finished with a definite result
    pub fn is_determined(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == MasterSlaveState::Idle && inner.status != MasterSlaveStatus::Indeterminate
    }

    pub fn status(&self) -> MasterSlaveStatus {
        self.inner.lock().status
    }

    pub fn state(&self) -> MasterSlaveState {
        self.inner.lock().state
    }

    pub fn retry_count(&self) -> u32 {
        self.inner.lock().retry_count
    }

    /// Determination number of the current attempt
    pub fn determination_number(&self) -> u32 {
        self.inner.lock().determination_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NegotiationConfig;
    use crate::negotiator::testing::environment;
    use proptest::prelude::*;
    use std::time::Duration;

    fn ack(decision: MasterSlaveStatus) -> H245Message {
        H245Message::MasterSlaveDeterminationAck { decision }
    }

    #[tokio::test]
    async fn test_start_then_incoming_makes_local_master() {
        let (env, connection) = environment(NegotiationConfig::new(60));
        let msd = MasterSlaveDetermination::new(env);

        msd.start(false).await.unwrap();
        let local = msd.determination_number();
        assert_eq!(
            connection.take_sent(),
            vec![H245Message::MasterSlaveDetermination {
                terminal_type: 60,
                determination_number: local,
            }]
        );

        let remote = local.wrapping_add(4000) & DETERMINATION_NUMBER_MASK;
        msd.handle_incoming(60, remote).await.unwrap();
        assert!(msd.is_master());
        assert_eq!(msd.state(), MasterSlaveState::Incoming);
        assert_eq!(connection.take_sent(), vec![ack(MasterSlaveStatus::Master)]);

        msd.handle_ack(MasterSlaveStatus::Slave).await.unwrap();
        assert!(msd.is_determined());
        assert!(connection.errors.lock().is_empty());
    }

    #[tokio::test]
    async fn test_start_is_noop_while_running() {
        let (env, connection) = environment(NegotiationConfig::new(60));
        let msd = MasterSlaveDetermination::new(env);

        msd.start(false).await.unwrap();
        msd.start(false).await.unwrap();
        assert_eq!(connection.take_sent().len(), 1);

        msd.start(true).await.unwrap();
        assert_eq!(connection.take_sent().len(), 1);
        assert_eq!(msd.retry_count(), 1);
    }

    #[tokio::test]
    async fn test_outgoing_adopts_opposite_of_remote_decision() {
        let (env, connection) = environment(NegotiationConfig::new(50));
        let msd = MasterSlaveDetermination::new(env);

        msd.start(false).await.unwrap();
        connection.take_sent();

        msd.handle_ack(MasterSlaveStatus::Master).await.unwrap();
        assert_eq!(msd.status(), MasterSlaveStatus::Slave);
        assert!(msd.is_determined());
        assert_eq!(connection.take_sent(), vec![ack(MasterSlaveStatus::Slave)]);
    }

    #[tokio::test]
    async fn test_ack_mismatch_is_fatal() {
        let (env, connection) = environment(NegotiationConfig::new(50));
        let msd = MasterSlaveDetermination::new(env);

        msd.handle_incoming(60, 1234).await.unwrap();
        assert_eq!(msd.status(), MasterSlaveStatus::Slave);

        msd.handle_ack(MasterSlaveStatus::Slave).await.unwrap();
        assert_eq!(msd.state(), MasterSlaveState::Idle);
        assert_eq!(connection.error_reasons(), vec!["Master/Slave mismatch"]);
    }

    #[tokio::test]
    async fn test_duplicate_request_while_incoming() {
        let (env, connection) = environment(NegotiationConfig::new(50));
        let msd = MasterSlaveDetermination::new(env);

        msd.handle_incoming(40, 1).await.unwrap();
        msd.handle_incoming(40, 1).await.unwrap();
        assert_eq!(msd.state(), MasterSlaveState::Idle);
        assert_eq!(connection.error_reasons(), vec!["Duplicate MasterSlaveDetermination"]);
        assert_eq!(connection.take_sent().len(), 1);
    }

    #[tokio::test]
    async fn test_identical_numbers_retry_until_exhausted() {
        let config = NegotiationConfig::new(50).with_master_slave_retries(3);
        let (env, connection) = environment(config);
        let msd = MasterSlaveDetermination::new(env);

        msd.start(false).await.unwrap();
        msd.handle_reject(MasterSlaveRejectCause::IdenticalNumbers).await.unwrap();
        assert_eq!(msd.retry_count(), 2);
        assert_eq!(msd.state(), MasterSlaveState::Outgoing);
        assert_eq!(connection.take_sent().len(), 2);

        msd.handle_reject(MasterSlaveRejectCause::IdenticalNumbers).await.unwrap();
        assert_eq!(msd.state(), MasterSlaveState::Idle);
        assert!(connection.take_sent().is_empty());
        assert_eq!(connection.error_reasons(), vec!["Retries exceeded"]);
    }

    #[tokio::test]
    async fn test_other_reject_is_fatal() {
        let (env, connection) = environment(NegotiationConfig::new(50));
        let msd = MasterSlaveDetermination::new(env);

        msd.start(false).await.unwrap();
        msd.handle_reject(MasterSlaveRejectCause::Unspecified).await.unwrap();
        assert_eq!(msd.state(), MasterSlaveState::Idle);
        assert_eq!(connection.error_reasons(), vec!["Rejected"]);
    }

    #[tokio::test]
    async fn test_idle_request_draws_fresh_number() {
        let mut acked = 0;
        let mut numbers = std::collections::HashSet::new();
        for _ in 0..20 {
            let (env, connection) = environment(NegotiationConfig::new(50));
            let msd = MasterSlaveDetermination::new(env);

            msd.handle_incoming(50, DETERMINATION_HALF_RANGE).await.unwrap();
            let number = msd.determination_number();
            numbers.insert(number);

            let expected = determine_status(50, number, 50, DETERMINATION_HALF_RANGE);
            if expected == MasterSlaveStatus::Indeterminate {
                assert_eq!(
                    connection.take_sent(),
                    vec![H245Message::MasterSlaveDeterminationReject {
                        cause: MasterSlaveRejectCause::IdenticalNumbers,
                    }]
                );
            } else {
                assert_eq!(msd.status(), expected);
                assert_eq!(msd.state(), MasterSlaveState::Incoming);
                assert_eq!(connection.take_sent(), vec![ack(expected)]);
                acked += 1;
            }
        }
        assert!(acked > 0);
        assert!(numbers.len() > 1);
    }

    #[tokio::test]
    async fn test_indeterminate_while_outgoing_restarts() {
        let (env, connection) = environment(NegotiationConfig::new(50));
        let msd = MasterSlaveDetermination::new(env);

        msd.start(false).await.unwrap();
        connection.take_sent();
        let number = msd.determination_number();

        msd.handle_incoming(50, number).await.unwrap();
        assert_eq!(msd.retry_count(), 2);
        assert_eq!(msd.state(), MasterSlaveState::Outgoing);
        let sent = connection.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].name(), "MasterSlaveDetermination");
    }

    #[tokio::test]
    async fn test_release_aborts() {
        let (env, connection) = environment(NegotiationConfig::new(50));
        let msd = MasterSlaveDetermination::new(env);

        msd.handle_release().await.unwrap();
        assert!(connection.errors.lock().is_empty());

        msd.start(false).await.unwrap();
        msd.handle_release().await.unwrap();
        assert_eq!(msd.state(), MasterSlaveState::Idle);
        assert_eq!(connection.error_reasons(), vec!["Aborted"]);
    }

    #[tokio::test]
    async fn test_timeout_in_outgoing_sends_release() {
        let (env, connection) = environment(NegotiationConfig::new(50));
        let msd = MasterSlaveDetermination::new(env);

        msd.start(false).await.unwrap();
        connection.take_sent();
        msd.handle_timeout().await.unwrap();

        assert_eq!(connection.take_sent(), vec![H245Message::MasterSlaveDeterminationRelease]);
        assert_eq!(msd.state(), MasterSlaveState::Idle);
        assert!(!msd.is_determined());
        assert_eq!(connection.error_reasons(), vec!["Timeout"]);
    }

    #[tokio::test]
    async fn test_reply_timer_expires() {
        let config = NegotiationConfig::new(50).with_master_slave_timeout(Duration::from_millis(20));
        let (env, connection) = environment(config);
        let msd = MasterSlaveDetermination::new(env);

        msd.start(false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(msd.state(), MasterSlaveState::Idle);
        assert_eq!(connection.error_reasons(), vec!["Timeout"]);
    }

    #[tokio::test]
    async fn test_completed_determination_ignores_timer() {
        let config = NegotiationConfig::new(50).with_master_slave_timeout(Duration::from_millis(20));
        let (env, connection) = environment(config);
        let msd = MasterSlaveDetermination::new(env);

        msd.start(false).await.unwrap();
        msd.handle_ack(MasterSlaveStatus::Slave).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(msd.is_master());
        assert!(connection.errors.lock().is_empty());
    }

    #[tokio::test]
    async fn test_forced_slave_waits_for_remote() {
        let config = NegotiationConfig::new(160).with_forced_slave();
        let (env, connection) = environment(config);
        let msd = MasterSlaveDetermination::new(env);

        msd.start(false).await.unwrap();
        assert!(connection.take_sent().is_empty());
        assert_eq!(msd.state(), MasterSlaveState::Outgoing);

        msd.handle_incoming(50, 42).await.unwrap();
        assert_eq!(msd.status(), MasterSlaveStatus::Slave);
        assert_eq!(connection.take_sent(), vec![ack(MasterSlaveStatus::Slave)]);
    }

    #[test]
    fn test_terminal_type_decides_first() {
        assert_eq!(determine_status(100, 0, 50, 0), MasterSlaveStatus::Master);
        assert_eq!(determine_status(50, 0, 100, 0), MasterSlaveStatus::Slave);
    }

    #[test]
    fn test_determination_number_comparison() {
        assert_eq!(determine_status(60, 1000, 60, 5000), MasterSlaveStatus::Master);
        assert_eq!(determine_status(60, 5000, 60, 1000), MasterSlaveStatus::Slave);
        assert_eq!(determine_status(60, 1000, 60, 1000), MasterSlaveStatus::Indeterminate);
        assert_eq!(determine_status(60, 1000, 60, 0x801000), MasterSlaveStatus::Indeterminate);
    }

    #[test]
    fn test_modulo_wraparound() {
        // 0x000010 - 0xFFFFF0 = 0x20 mod 2^24
        assert_eq!(determine_status(60, 0xFF_FFF0, 60, 0x10), MasterSlaveStatus::Master);
        assert_eq!(determine_status(60, 0x10, 60, 0xFF_FFF0), MasterSlaveStatus::Slave);
    }

    proptest! {
        #[test]
        fn prop_lower_remote_terminal_type_makes_local_master(
            local in 1u8..=255, remote_offset in 1u8..=255, a in any::<u32>(), b in any::<u32>()
        ) {
            let remote = local.saturating_sub(remote_offset);
            prop_assume!(remote < local);
            prop_assert_eq!(determine_status(local, a, remote, b), MasterSlaveStatus::Master);
            prop_assert_eq!(determine_status(remote, b, local, a), MasterSlaveStatus::Slave);
        }

        #[test]
        fn prop_both_sides_reach_opposite_roles(
            tt in any::<u8>(), a in 0u32..=DETERMINATION_NUMBER_MASK, b in 0u32..=DETERMINATION_NUMBER_MASK
        ) {
            let ours = determine_status(tt, a, tt, b);
            let theirs = determine_status(tt, b, tt, a);
            prop_assert_eq!(ours.opposite(), theirs);
        }
    }
}
