//! Plumbing shared by every negotiation machine

use std::sync::Arc;

use tracing::{debug, warn};

use super::timer::ReplyTimer;
use crate::compat::{CompatibilityPolicy, StrictMaster};
use crate::config::NegotiationConfig;
use crate::connection::ControlConnection;
use crate::errors::{H245Error, H245Result, ProtocolErrorKind};
use crate::protocol::H245Message;

/// Collaborators of one call, shared by all machines
#[derive(Clone)]
pub struct NegotiatorEnvironment {
    pub config: Arc<NegotiationConfig>,
    pub connection: Arc<dyn ControlConnection>,
    pub policy: Arc<dyn CompatibilityPolicy>,
}

impl NegotiatorEnvironment {
    pub fn new(config: NegotiationConfig, connection: Arc<dyn ControlConnection>) -> Self {
        Self {
            config: Arc::new(config),
            connection,
            policy: Arc::new(StrictMaster),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn CompatibilityPolicy>) -> Self {
        self.policy = policy;
        self
    }
}

/// Per-machine context: the environment, a reply timer and the error kind it reports under
pub struct NegotiatorContext {
    pub(crate) env: NegotiatorEnvironment,
    pub(crate) timer: ReplyTimer,
    kind: ProtocolErrorKind,
}

impl NegotiatorContext {
    pub fn new(env: NegotiatorEnvironment, kind: ProtocolErrorKind, timer_name: &'static str) -> Self {
        Self {
            env,
            timer: ReplyTimer::new(timer_name),
            kind,
        }
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.env.config
    }

    pub fn connection(&self) -> &dyn ControlConnection {
        self.env.connection.as_ref()
    }

    pub fn kind(&self) -> ProtocolErrorKind {
        self.kind
    }

    /// Write one message on the control channel
    pub async fn send(&self, message: H245Message) -> H245Result<()> {
        debug!("{}: sending {}", self.kind, message);
        self.env
            .connection
            .write_control_message(message)
            .await
            .map_err(|e| {
                warn!("{}: control channel write failed: {}", self.kind, e);
                H245Error::from(e)
            })
    }

    /// Report a condition this machine cannot resolve
    ///
    /// Succeeds when the connection wants processing to continue.
    pub fn protocol_error(&self, reason: &str) -> H245Result<()> {
        warn!("{}: protocol error: {}", self.kind, reason);
        if self.env.connection.report_protocol_error(self.kind, reason) {
            Ok(())
        } else {
            Err(H245Error::protocol(self.kind, reason))
        }
    }

    /// Carry out the effects of a committed transition
    ///
    /// Messages go out first, then any error is reported. A failed write does
    /// not undo the transition.
    pub(crate) async fn complete(&self, transition: Transition) -> H245Result<()> {
        let mut sent = Ok(());
        for message in transition.messages {
            if let Err(e) = self.send(message).await {
                sent = Err(e);
                break;
            }
        }
        let reported = match transition.error {
            Some(reason) => self.protocol_error(reason),
            None => Ok(()),
        };
        sent.and(reported)
    }
}

/// Side effects decided under a machine's lock and executed after it is released
#[derive(Debug, Default)]
#[must_use]
pub(crate) struct Transition {
    pub messages: Vec<H245Message>,
    pub error: Option<&'static str>,
}

impl Transition {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn send(message: H245Message) -> Self {
        Self {
            messages: vec![message],
            error: None,
        }
    }

    pub fn fail(reason: &'static str) -> Self {
        Self {
            messages: Vec::new(),
            error: Some(reason),
        }
    }

    pub fn and_fail(mut self, reason: &'static str) -> Self {
        self.error = Some(reason);
        self
    }

    pub fn push(&mut self, message: H245Message) {
        self.messages.push(message);
    }
}
