use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    api::ApiPort,
    domain::{normalize, Nation, TelegramCategory},
    eligibility::EligibilityChecker,
    monitor::{
        poller::{PollTask, Poller},
        Monitor, PolledMonitor,
    },
    Error, Result,
};

/// Newly founded nations, newest first, de-duplicated, bounded to a recent
/// window. Foundings in sinker regions are re-foundings of ceased nations
/// and can be excluded. Never exhausts.
pub struct FoundingMonitor {
    api: Arc<dyn ApiPort>,
    keep: usize,
    sinkers: Vec<String>,
    include_refounds: bool,
    recent: Mutex<VecDeque<Nation>>,
    poller: Poller,
}

impl FoundingMonitor {
    pub fn new(
        api: Arc<dyn ApiPort>,
        period: Duration,
        keep: usize,
        sinkers: &[String],
        include_refounds: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            keep,
            sinkers: sinkers.iter().map(|s| normalize(s)).collect(),
            include_refounds,
            recent: Mutex::new(VecDeque::new()),
            poller: Poller::new(period),
        })
    }

    fn is_refound(&self, region: &str) -> bool {
        let region = normalize(region);
        self.sinkers.iter().any(|s| *s == region)
    }
}

#[async_trait]
impl PollTask for FoundingMonitor {
    fn name(&self) -> &'static str {
        "founding monitor"
    }

    async fn refresh(&self) -> Result<()> {
        let feed = self.api.recent_foundings().await?;

        let mut recent = self.recent.lock().unwrap();
        // Walk the feed oldest-first so push_front leaves the newest at the
        // head without reordering what is already known.
        for founding in feed.iter().rev() {
            if !self.include_refounds && self.is_refound(&founding.region) {
                continue;
            }
            if recent.contains(&founding.nation) {
                continue;
            }
            recent.push_front(founding.nation.clone());
        }
        recent.truncate(self.keep);
        Ok(())
    }
}

#[async_trait]
impl Monitor for FoundingMonitor {
    async fn recipients(&self) -> Result<Vec<Nation>> {
        if let Some(failure) = self.poller.failure() {
            return Err(Error::PollFailed(failure));
        }
        Ok(self.recent.lock().unwrap().iter().cloned().collect())
    }

    fn exhausted(&self) -> bool {
        false
    }
}

#[async_trait]
impl PolledMonitor for FoundingMonitor {
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

/// Founding feed filtered for recruit acceptance, capped per poll so a burst
/// of foundings cannot swamp a single batch. Never exhausts.
pub struct RecruitMonitor {
    foundings: Arc<FoundingMonitor>,
    checker: EligibilityChecker,
    batch: usize,
}

impl RecruitMonitor {
    pub fn new(foundings: Arc<FoundingMonitor>, checker: EligibilityChecker, batch: usize) -> Arc<Self> {
        Arc::new(Self {
            foundings,
            checker,
            batch,
        })
    }
}

#[async_trait]
impl Monitor for RecruitMonitor {
    async fn recipients(&self) -> Result<Vec<Nation>> {
        let mut batch = Vec::new();
        for nation in self.foundings.recipients().await? {
            if batch.len() >= self.batch {
                break;
            }
            if self
                .checker
                .accepts(&nation, TelegramCategory::Recruit)
                .await?
            {
                batch.push(nation);
            }
        }
        Ok(batch)
    }

    fn exhausted(&self) -> bool {
        false
    }
}

#[async_trait]
impl PolledMonitor for RecruitMonitor {
    fn start(self: Arc<Self>) {
        Arc::clone(&self.foundings).start();
    }

    fn stop(&self) {
        self.foundings.stop();
    }

    fn running(&self) -> bool {
        self.foundings.running()
    }

    fn set_period(&self, period: Duration) {
        self.foundings.set_period(period);
    }

    async fn wait_ready(&self) {
        self.foundings.wait_ready().await;
    }
}
