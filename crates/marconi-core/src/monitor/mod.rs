//! Recipient sources.
//!
//! A monitor yields batches of candidate recipients and reports when it is
//! permanently out of them. Feed-backed monitors poll in the background
//! (`PolledMonitor`); decorators wrap any monitor to add dedup, caps, or
//! wait-for-first-data semantics.

pub mod activity;
pub mod decorators;
pub mod delegates;
pub mod founding;
pub mod movement;
pub mod poller;
pub mod registry;
pub mod wa;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{domain::Nation, Result};

pub use activity::ActivityMonitor;
pub use decorators::{ExhaustiveMonitor, LimitedMonitor, WaitingMonitor};
pub use delegates::DelegateMonitor;
pub use founding::{FoundingMonitor, RecruitMonitor};
pub use movement::MovementMonitor;
pub use registry::{parse_spec, MonitorKey, MonitorRegistry, MonitorSettings};
pub use wa::{ApprovalMonitor, VoteMonitor};

#[async_trait]
pub trait Monitor: Send + Sync {
    /// The current batch of candidate recipients, possibly empty. Must not
    /// block beyond a single synchronous refresh; background monitors serve
    /// their latest snapshot without touching the network.
    async fn recipients(&self) -> Result<Vec<Nation>>;

    /// Once true, permanently true: the source will never yield again.
    fn exhausted(&self) -> bool;

    /// Best-effort remaining-count estimate; `None` for perpetual feeds.
    fn remaining(&self) -> Option<usize> {
        None
    }
}

/// A monitor backed by a recurring background refresh.
#[async_trait]
pub trait PolledMonitor: Monitor {
    /// Spawn the poll loop. The first refresh runs immediately. Starting an
    /// already-running monitor is a no-op; a stopped one restarts (honoring
    /// a period changed via [`set_period`](Self::set_period)).
    fn start(self: Arc<Self>);

    /// Cancel the poll loop. Idempotent.
    fn stop(&self);

    fn running(&self) -> bool;

    /// Takes effect on the next start.
    fn set_period(&self, period: Duration);

    /// Resolves once the first refresh has completed, so callers can avoid
    /// reading the pre-initialization empty state.
    async fn wait_ready(&self);
}

/// Fixed recipient list. Yields the same batch forever and never exhausts;
/// wrap it in decorators for dedup or caps.
pub struct SnapshotMonitor {
    nations: Vec<Nation>,
}

impl SnapshotMonitor {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            nations: names.into_iter().map(|n| Nation::new(n.as_ref())).collect(),
        }
    }
}

#[async_trait]
impl Monitor for SnapshotMonitor {
    async fn recipients(&self) -> Result<Vec<Nation>> {
        Ok(self.nations.clone())
    }

    fn exhausted(&self) -> bool {
        false
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.nations.len())
    }
}
