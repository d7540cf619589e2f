//! Round trip delay probing (H.245 §8.10)
//!
//! A missed response only costs one retry; once the budget is spent the
//! remote is presumed offline, which the connection may poll with
//! [`RoundTripDelayMonitor::is_remote_offline`]. A later response restores it.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::context::{NegotiatorContext, NegotiatorEnvironment, Transition};
use crate::errors::{H245Error, H245Result, ProtocolErrorKind};
use crate::protocol::{next_sequence_number, H245Message};

#[derive(Debug)]
struct ProbeState {
    awaiting_response: bool,
    sequence_number: u8,
    sent_at: Option<Instant>,
    retries_left: u32,
    last_delay: Option<Duration>,
}

/// Round trip delay signalling entity
pub struct RoundTripDelayMonitor {
    ctx: NegotiatorContext,
    inner: Mutex<ProbeState>,
    periodic: Mutex<Option<JoinHandle<()>>>,
    me: Weak<Self>,
}

impl RoundTripDelayMonitor {
    pub fn new(env: NegotiatorEnvironment) -> Arc<Self> {
        let retries_left = env.config.round_trip_delay_retries;
        Arc::new_cyclic(|me| Self {
            ctx: NegotiatorContext::new(env, ProtocolErrorKind::RoundTripDelay, "round trip delay"),
            inner: Mutex::new(ProbeState {
                awaiting_response: false,
                sequence_number: 0,
                sent_at: None,
                retries_left,
                last_delay: None,
            }),
            periodic: Mutex::new(None),
            me: me.clone(),
        })
    }

    /// Send one probe
    pub async fn start_request(&self) -> H245Result<()> {
        let transition = {
            let mut inner = self.inner.lock();
            self.arm_timer();
            inner.sequence_number = next_sequence_number(inner.sequence_number);
            inner.sent_at = Some(Instant::now());
            inner.awaiting_response = true;
            trace!("Sending RoundTripDelayRequest seq={}", inner.sequence_number);
            Transition::send(H245Message::RoundTripDelayRequest {
                sequence_number: inner.sequence_number,
            })
        };
        self.ctx.complete(transition).await
    }

    pub async fn handle_request(&self, sequence_number: u8) -> H245Result<()> {
        self.ctx
            .send(H245Message::RoundTripDelayResponse { sequence_number })
            .await
    }

    pub async fn handle_response(&self, sequence_number: u8) -> H245Result<()> {
        let delay = {
            let mut inner = self.inner.lock();
            if !inner.awaiting_response || inner.sequence_number != sequence_number {
                trace!("Ignoring RoundTripDelayResponse seq={}", sequence_number);
                return Ok(());
            }
            self.ctx.timer.stop();
            inner.awaiting_response = false;
            inner.retries_left = self.ctx.config().round_trip_delay_retries;
            let delay = inner.sent_at.map(|sent| sent.elapsed()).unwrap_or_default();
            inner.last_delay = Some(delay);
            delay
        };
        debug!("Round trip delay {:?}", delay);
        self.ctx.connection().on_round_trip_delay(delay);
        Ok(())
    }

    pub async fn handle_timeout(&self) -> H245Result<()> {
        self.expire(None);
        Ok(())
    }

    fn expire(&self, generation: Option<u64>) {
        let mut inner = self.inner.lock();
        if let Some(generation) = generation {
            if !self.ctx.timer.is_current(generation) {
                trace!("Ignoring stale round trip delay timer");
                return;
            }
        }
        self.ctx.timer.stop();
        inner.awaiting_response = false;
        inner.retries_left = inner.retries_left.saturating_sub(1);
        if inner.retries_left == 0 {
            warn!("No round trip delay response, remote presumed offline");
        } else {
            debug!("Round trip delay probe timed out, {} retries left", inner.retries_left);
        }
    }

    fn arm_timer(&self) {
        let me = self.me.clone();
        self.ctx
            .timer
            .arm(self.ctx.config().round_trip_delay_timeout, move |generation| async move {
                if let Some(monitor) = me.upgrade() {
                    monitor.expire(Some(generation));
                }
            });
    }

    /// Probe every `interval` while no probe is outstanding
    pub fn start_periodic(&self, interval: Duration) -> H245Result<()> {
        let handle = Handle::try_current()
            .map_err(|_| H245Error::invalid_state("start round trip delay probing", "no tokio runtime"))?;

        let me = self.me.clone();
        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(monitor) = me.upgrade() else {
                    break;
                };
                if monitor.is_awaiting_response() {
                    continue;
                }
                if let Err(e) = monitor.start_request().await {
                    debug!("Round trip delay probe failed: {}", e);
                }
            }
        });

        if let Some(previous) = self.periodic.lock().replace(task) {
            previous.abort();
        }
        debug!("Round trip delay probing every {:?}", interval);
        Ok(())
    }

    pub fn stop_periodic(&self) {
        if let Some(task) = self.periodic.lock().take() {
            task.abort();
        }
    }

    pub fn is_remote_offline(&self) -> bool {
        self.inner.lock().retries_left == 0
    }

    pub fn is_awaiting_response(&self) -> bool {
        self.inner.lock().awaiting_response
    }

    pub fn retries_left(&self) -> u32 {
        self.inner.lock().retries_left
    }

    /// Last measured round trip delay
    pub fn round_trip_delay(&self) -> Option<Duration> {
        self.inner.lock().last_delay
    }

    pub fn sequence_number(&self) -> u8 {
        self.inner.lock().sequence_number
    }
}

impl Drop for RoundTripDelayMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.periodic.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NegotiationConfig;
    use crate::negotiator::testing::environment;

    #[tokio::test]
    async fn test_response_measures_delay() {
        let (env, connection) = environment(NegotiationConfig::default());
        let rtd = RoundTripDelayMonitor::new(env);

        rtd.start_request().await.unwrap();
        assert!(rtd.is_awaiting_response());
        assert_eq!(
            connection.take_sent(),
            vec![H245Message::RoundTripDelayRequest { sequence_number: 1 }]
        );

        rtd.handle_response(5).await.unwrap();
        assert!(rtd.is_awaiting_response());

        rtd.handle_response(1).await.unwrap();
        assert!(!rtd.is_awaiting_response());
        assert!(rtd.round_trip_delay().is_some());
    }

    #[tokio::test]
    async fn test_request_is_echoed() {
        let (env, connection) = environment(NegotiationConfig::default());
        let rtd = RoundTripDelayMonitor::new(env);

        rtd.handle_request(200).await.unwrap();
        assert_eq!(
            connection.take_sent(),
            vec![H245Message::RoundTripDelayResponse { sequence_number: 200 }]
        );
    }

    #[tokio::test]
    async fn test_three_timeouts_mark_remote_offline() {
        let (env, connection) = environment(NegotiationConfig::default().with_round_trip_delay_retries(3));
        let rtd = RoundTripDelayMonitor::new(env);

        for expected in [2, 1, 0] {
            rtd.start_request().await.unwrap();
            rtd.handle_timeout().await.unwrap();
            assert_eq!(rtd.retries_left(), expected);
        }
        assert!(rtd.is_remote_offline());
        assert!(connection.errors.lock().is_empty());

        rtd.handle_timeout().await.unwrap();
        assert_eq!(rtd.retries_left(), 0);

        // Probing continues and a response restores the budget
        rtd.start_request().await.unwrap();
        rtd.handle_response(rtd.sequence_number()).await.unwrap();
        assert!(!rtd.is_remote_offline());
        assert_eq!(rtd.retries_left(), 3);
    }

    #[tokio::test]
    async fn test_periodic_probe() {
        let (env, connection) = environment(NegotiationConfig::default());
        let rtd = RoundTripDelayMonitor::new(env);

        rtd.start_periodic(Duration::from_millis(10)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        rtd.stop_periodic();

        // Only one probe while the first is unanswered
        assert_eq!(
            connection.take_sent(),
            vec![H245Message::RoundTripDelayRequest { sequence_number: 1 }]
        );
    }
}
