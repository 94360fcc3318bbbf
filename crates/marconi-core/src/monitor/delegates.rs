use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use rand::seq::SliceRandom;

use crate::{
    cache::{WorldCache, DELEGATE_KEY},
    domain::Nation,
    monitor::{
        poller::{PollTask, Poller},
        Monitor, PolledMonitor,
    },
    Error, Result,
};

/// The current regional-delegate roster, reshuffled on every refresh so a
/// campaign does not hammer the same delegates first. Exhausts after a fixed
/// wall-clock horizon as a safety valve against unbounded runs.
pub struct DelegateMonitor {
    cache: Arc<WorldCache>,
    horizon: Duration,
    started: Mutex<Option<Instant>>,
    order: Mutex<Vec<Nation>>,
    poller: Poller,
}

impl DelegateMonitor {
    pub fn new(cache: Arc<WorldCache>, period: Duration, horizon: Duration) -> Arc<Self> {
        Arc::new(Self {
            cache,
            horizon,
            started: Mutex::new(None),
            order: Mutex::new(Vec::new()),
            poller: Poller::new(period),
        })
    }
}

#[async_trait]
impl PollTask for DelegateMonitor {
    fn name(&self) -> &'static str {
        "delegate monitor"
    }

    async fn refresh(&self) -> Result<()> {
        // Bound the roster's age by the poll period so each refresh sees a
        // roster no older than one cycle.
        let roster = self
            .cache
            .delegates
            .lookup_within(DELEGATE_KEY, self.poller.period())
            .await?;

        let mut order = roster.delegates.clone();
        order.shuffle(&mut rand::thread_rng());
        *self.order.lock().unwrap() = order;
        Ok(())
    }
}

#[async_trait]
impl Monitor for DelegateMonitor {
    async fn recipients(&self) -> Result<Vec<Nation>> {
        if let Some(failure) = self.poller.failure() {
            return Err(Error::PollFailed(failure));
        }
        Ok(self.order.lock().unwrap().clone())
    }

    fn exhausted(&self) -> bool {
        match *self.started.lock().unwrap() {
            Some(at) => at.elapsed() >= self.horizon,
            None => false,
        }
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.order.lock().unwrap().len())
    }
}

#[async_trait]
impl PolledMonitor for DelegateMonitor {
    fn start(self: Arc<Self>) {
        self.started.lock().unwrap().get_or_insert_with(Instant::now);
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
