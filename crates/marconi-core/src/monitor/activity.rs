use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;

use crate::{
    api::ApiPort,
    domain::Nation,
    monitor::{
        poller::{PollTask, Poller},
        Monitor, PolledMonitor,
    },
    Error, Result,
};

/// Nations seen in the recent-happenings feed within a sliding window,
/// most recent first. A perpetual feed: never exhausts.
pub struct ActivityMonitor {
    api: Arc<dyn ApiPort>,
    window: Duration,
    seen: Mutex<HashMap<Nation, Instant>>,
    poller: Poller,
}

impl ActivityMonitor {
    pub fn new(api: Arc<dyn ApiPort>, window: Duration, period: Duration) -> Arc<Self> {
        Arc::new(Self {
            api,
            window,
            seen: Mutex::new(HashMap::new()),
            poller: Poller::new(period),
        })
    }
}

#[async_trait]
impl PollTask for ActivityMonitor {
    fn name(&self) -> &'static str {
        "activity monitor"
    }

    async fn refresh(&self) -> Result<()> {
        let active = self.api.active_nations().await?;
        let now = Instant::now();
        let window = self.window;

        let mut seen = self.seen.lock().unwrap();
        for nation in active {
            seen.insert(nation, now);
        }
        seen.retain(|_, at| at.elapsed() < window);
        Ok(())
    }
}

#[async_trait]
impl Monitor for ActivityMonitor {
    async fn recipients(&self) -> Result<Vec<Nation>> {
        if let Some(failure) = self.poller.failure() {
            return Err(Error::PollFailed(failure));
        }
        let seen = self.seen.lock().unwrap();
        let mut recent: Vec<(&Nation, &Instant)> = seen
            .iter()
            .filter(|(_, at)| at.elapsed() < self.window)
            .collect();
        recent.sort_by(|a, b| b.1.cmp(a.1));
        Ok(recent.into_iter().map(|(n, _)| n.clone()).collect())
    }

    fn exhausted(&self) -> bool {
        false
    }
}

#[async_trait]
impl PolledMonitor for ActivityMonitor {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::StubApi;

    #[tokio::test]
    async fn yields_nations_inside_the_window() {
        let api = Arc::new(StubApi::new());
        api.set_active(&["alpha", "bravo"]);
        let monitor = ActivityMonitor::new(api, Duration::from_secs(60), Duration::from_secs(60));

        monitor.refresh().await.unwrap();
        let batch = monitor.recipients().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.contains(&Nation::new("alpha")));
        assert!(!monitor.exhausted());
    }

    #[tokio::test]
    async fn window_expiry_drops_stale_activity() {
        let api = Arc::new(StubApi::new());
        api.set_active(&["alpha"]);
        let monitor =
            ActivityMonitor::new(api.clone(), Duration::from_millis(30), Duration::from_secs(60));

        monitor.refresh().await.unwrap();
        assert_eq!(monitor.recipients().await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(monitor.recipients().await.unwrap().is_empty());

        // A later sighting re-admits the nation.
        monitor.refresh().await.unwrap();
        assert_eq!(monitor.recipients().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn background_start_primes_the_latch() {
        let api = Arc::new(StubApi::new());
        api.set_active(&["alpha"]);
        let monitor = ActivityMonitor::new(api, Duration::from_secs(60), Duration::from_secs(60));

        Arc::clone(&monitor).start();
        monitor.wait_ready().await;
        assert_eq!(monitor.recipients().await.unwrap().len(), 1);
        monitor.stop();
        assert!(!monitor.running());
    }
}
