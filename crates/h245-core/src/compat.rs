//! Interoperability policies
//!
//! When an incoming unidirectional channel cannot start because it clashes
//! with one of ours, H.245 has the master reject it with
//! `masterSlaveConflict`. Some endpoints never reopen a channel rejected that
//! way, so against them the master behaves like a slave: it closes its own
//! channel and accepts the remote one.

use std::fmt;

/// Decides how the master reacts to a channel conflict
pub trait CompatibilityPolicy: Send + Sync + fmt::Debug {
    /// Whether to yield instead of rejecting the remote channel
    fn yield_on_channel_conflict(&self, remote_application: &str) -> bool;
}

/// Follow H.245 to the letter and always reject as master
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictMaster;

impl CompatibilityPolicy for StrictMaster {
    fn yield_on_channel_conflict(&self, _remote_application: &str) -> bool {
        false
    }
}

/// Yield to remotes whose product name contains one of the listed names
///
/// ```rust
/// use rvoip_h245_core::{CompatibilityPolicy, YieldToApplications};
///
/// let policy = YieldToApplications::new(["NetMeeting"]);
/// assert!(policy.yield_on_channel_conflict("Microsoft\tNetMeeting\t3.01"));
/// assert!(!policy.yield_on_channel_conflict("Polycom HDX"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct YieldToApplications {
    products: Vec<String>,
}

impl YieldToApplications {
    pub fn new<I, S>(products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            products: products.into_iter().map(Into::into).collect(),
        }
    }
}

impl CompatibilityPolicy for YieldToApplications {
    fn yield_on_channel_conflict(&self, remote_application: &str) -> bool {
        self.products
            .iter()
            .any(|product| !product.is_empty() && remote_application.contains(product.as_str()))
    }
}
