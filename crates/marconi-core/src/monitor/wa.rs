//! World Assembly monitors: proposal approvals and at-vote resolutions.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    api::ApiPort,
    domain::{ApprovalChange, Chamber, Nation, VoteSide},
    monitor::{
        poller::{PollTask, Poller},
        Monitor, PolledMonitor,
    },
    Error, Result,
};

#[derive(Default)]
struct ApprovalState {
    primed: bool,
    /// Every approver ever observed, including the initial roster.
    union: HashSet<Nation>,
    current: HashSet<Nation>,
    delta: Vec<Nation>,
}

/// Delegates whose approval on one proposal changed after monitoring began.
///
/// The first refresh primes the baseline and yields nobody; `GivenTo`
/// reports first-time approvers (a withdrawn-then-restored approval is not
/// reported again), `RemovedFrom` reports withdrawals since the previous
/// refresh. Exhausts permanently once the proposal no longer exists.
pub struct ApprovalMonitor {
    api: Arc<dyn ApiPort>,
    proposal: String,
    change: ApprovalChange,
    state: Mutex<ApprovalState>,
    gone: AtomicBool,
    poller: Poller,
}

impl ApprovalMonitor {
    pub fn new(
        api: Arc<dyn ApiPort>,
        proposal: &str,
        change: ApprovalChange,
        period: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            proposal: proposal.to_string(),
            change,
            state: Mutex::new(ApprovalState::default()),
            gone: AtomicBool::new(false),
            poller: Poller::new(period),
        })
    }
}

#[async_trait]
impl PollTask for ApprovalMonitor {
    fn name(&self) -> &'static str {
        "approval monitor"
    }

    async fn refresh(&self) -> Result<()> {
        if self.gone.load(Ordering::SeqCst) {
            return Ok(());
        }
        let approvers = match self.api.proposal_approvals(&self.proposal).await {
            Ok(v) => v,
            Err(Error::NotFound(_)) => {
                self.gone.store(true, Ordering::SeqCst);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let now: HashSet<Nation> = approvers.into_iter().collect();

        let mut st = self.state.lock().unwrap();
        if !st.primed {
            st.primed = true;
            st.union = now.clone();
            st.current = now;
            st.delta.clear();
            return Ok(());
        }

        let fresh: Vec<Nation> = match self.change {
            ApprovalChange::GivenTo => now.difference(&st.union).cloned().collect(),
            ApprovalChange::RemovedFrom => st.current.difference(&now).cloned().collect(),
        };
        st.delta = fresh;
        st.union.extend(now.iter().cloned());
        st.current = now;
        Ok(())
    }
}

#[async_trait]
impl Monitor for ApprovalMonitor {
    async fn recipients(&self) -> Result<Vec<Nation>> {
        if let Some(failure) = self.poller.failure() {
            return Err(Error::PollFailed(failure));
        }
        if self.gone.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        Ok(self.state.lock().unwrap().delta.clone())
    }

    fn exhausted(&self) -> bool {
        self.gone.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolledMonitor for ApprovalMonitor {
    fn start(self: Arc<Self>) {
        let task = Arc::clone(&self) as Arc<dyn PollTask>;
        self.poller.start(task);
    }

    fn stop(&self) {
        self.poller.stop();
    }

    fn running(&self) -> bool {
        self.poller.running()
    }

    fn set_period(&self, period: Duration) {
        self.poller.set_period(period);
    }

    async fn wait_ready(&self) {
        self.poller.wait_ready().await;
    }
}

#[derive(Default)]
struct VoteState {
    resolution: Option<String>,
    voters: Vec<Nation>,
}

/// Current voters in one direction on the at-vote resolution.
///
/// The full roster is yielded on every refresh (cross-call dedup is the
/// exhaustive decorator's job). Exhausts once the at-vote resolution id
/// changes from the one captured by the first refresh, or the chamber has
/// nothing at vote anymore.
pub struct VoteMonitor {
    api: Arc<dyn ApiPort>,
    chamber: Chamber,
    side: VoteSide,
    state: Mutex<VoteState>,
    closed: AtomicBool,
    poller: Poller,
}

impl VoteMonitor {
    pub fn new(
        api: Arc<dyn ApiPort>,
        chamber: Chamber,
        side: VoteSide,
        period: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            chamber,
            side,
            state: Mutex::new(VoteState::default()),
            closed: AtomicBool::new(false),
            poller: Poller::new(period),
        })
    }
}

#[async_trait]
impl PollTask for VoteMonitor {
    fn name(&self) -> &'static str {
        "vote monitor"
    }

    async fn refresh(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let roster = match self.api.resolution_voters(self.chamber, self.side).await {
            Ok(r) => r,
            Err(Error::NotFound(_)) => {
                self.closed.store(true, Ordering::SeqCst);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut st = self.state.lock().unwrap();
        match st.resolution.clone() {
            None => {
                st.resolution = Some(roster.resolution);
                st.voters = roster.voters;
            }
            Some(id) if id != roster.resolution => {
                // The monitored resolution closed; a successor being at vote
                // does not revive this monitor.
                self.closed.store(true, Ordering::SeqCst);
                st.voters.clear();
            }
            Some(_) => st.voters = roster.voters,
        }
        Ok(())
    }
}

#[async_trait]
impl Monitor for VoteMonitor {
    async fn recipients(&self) -> Result<Vec<Nation>> {
        if let Some(failure) = self.poller.failure() {
            return Err(Error::PollFailed(failure));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        Ok(self.state.lock().unwrap().voters.clone())
    }

    fn exhausted(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolledMonitor for VoteMonitor {
    fn start(self: Arc<Self>) {
        let task = Arc::clone(&self) as Arc<dyn PollTask>;
        self.poller.start(task);
    }

    fn stop(&self) {
        self.poller.stop();
    }

    fn running(&self) -> bool {
        self.poller.running()
    }

    fn set_period(&self, period: Duration) {
        self.poller.set_period(period);
    }

    async fn wait_ready(&self) {
        self.poller.wait_ready().await;
    }
}
