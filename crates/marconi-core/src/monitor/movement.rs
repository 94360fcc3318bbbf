use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    api::ApiPort,
    domain::{normalize, MovementDirection, Nation},
    monitor::{
        poller::{PollTask, Poller},
        Monitor, PolledMonitor,
    },
    Error, Result,
};

#[derive(Default)]
struct MoveState {
    prev: HashMap<String, HashSet<Nation>>,
    recent: VecDeque<Nation>,
}

/// Nations that moved into (or out of) a set of watched regions, derived
/// from the membership set-difference between consecutive snapshots. Keeps a
/// bounded recently-moved history, newest first. Never exhausts.
pub struct MovementMonitor {
    api: Arc<dyn ApiPort>,
    regions: Vec<String>,
    direction: MovementDirection,
    history: usize,
    state: Mutex<MoveState>,
    poller: Poller,
}

impl MovementMonitor {
    pub fn new(
        api: Arc<dyn ApiPort>,
        regions: &[String],
        direction: MovementDirection,
        period: Duration,
        history: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            regions: regions.iter().map(|r| normalize(r)).collect(),
            direction,
            history,
            state: Mutex::new(MoveState::default()),
            poller: Poller::new(period),
        })
    }
}

#[async_trait]
impl PollTask for MovementMonitor {
    fn name(&self) -> &'static str {
        "movement monitor"
    }

    async fn refresh(&self) -> Result<()> {
        // Fetch every snapshot before touching the state so the lock is
        // never held across a network call.
        let mut snapshots = Vec::with_capacity(self.regions.len());
        for region in &self.regions {
            let members: HashSet<Nation> =
                self.api.region_nations(region).await?.into_iter().collect();
            snapshots.push((region.clone(), members));
        }

        let mut st = self.state.lock().unwrap();
        for (region, now) in snapshots {
            if let Some(prev) = st.prev.get(&region) {
                let mut moved = self.direction.moved(prev, &now);
                moved.sort();
                for nation in moved {
                    if !st.recent.contains(&nation) {
                        st.recent.push_front(nation);
                    }
                }
            }
            st.prev.insert(region, now);
        }
        st.recent.truncate(self.history);
        Ok(())
    }
}

#[async_trait]
impl Monitor for MovementMonitor {
    async fn recipients(&self) -> Result<Vec<Nation>> {
        if let Some(failure) = self.poller.failure() {
            return Err(Error::PollFailed(failure));
        }
        Ok(self.state.lock().unwrap().recent.iter().cloned().collect())
    }

    fn exhausted(&self) -> bool {
        false
    }
}

#[async_trait]
impl PolledMonitor for MovementMonitor {
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

    fn monitor(api: Arc<StubApi>, direction: MovementDirection) -> Arc<MovementMonitor> {
        MovementMonitor::new(
            api,
            &["europe".to_string()],
            direction,
            Duration::from_secs(60),
            64,
        )
    }

    #[tokio::test]
    async fn into_reports_arrivals() {
        let api = Arc::new(StubApi::new());
        api.push_region_members("europe", &["a", "b", "c"]);
        api.push_region_members("europe", &["b", "c", "d"]);
        let monitor = monitor(api, MovementDirection::Into);

        monitor.refresh().await.unwrap(); // prime
        assert!(monitor.recipients().await.unwrap().is_empty());

        monitor.refresh().await.unwrap();
        assert_eq!(monitor.recipients().await.unwrap(), vec![Nation::new("d")]);
        assert!(!monitor.exhausted());
    }

    #[tokio::test]
    async fn out_of_reports_departures() {
        let api = Arc::new(StubApi::new());
        api.push_region_members("europe", &["a", "b", "c"]);
        api.push_region_members("europe", &["b", "c", "d"]);
        let monitor = monitor(api, MovementDirection::OutOf);

        monitor.refresh().await.unwrap();
        monitor.refresh().await.unwrap();
        assert_eq!(monitor.recipients().await.unwrap(), vec![Nation::new("a")]);
    }

    #[tokio::test]
    async fn watches_every_region_and_keeps_newest_first() {
        let api = Arc::new(StubApi::new());
        api.push_region_members("europe", &["a"]);
        api.push_region_members("europe", &["a", "b"]);
        api.push_region_members("osiris", &[]);
        api.push_region_members("osiris", &["c"]);
        let monitor = MovementMonitor::new(
            api,
            &["europe".to_string(), "osiris".to_string()],
            MovementDirection::Into,
            Duration::from_secs(60),
            64,
        );

        monitor.refresh().await.unwrap();
        monitor.refresh().await.unwrap();
        let batch = monitor.recipients().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.contains(&Nation::new("b")));
        assert!(batch.contains(&Nation::new("c")));
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let api = Arc::new(StubApi::new());
        api.push_region_members("europe", &[]);
        api.push_region_members("europe", &["a", "b", "c", "d"]);
        let monitor = MovementMonitor::new(
            api,
            &["europe".to_string()],
            MovementDirection::Into,
            Duration::from_secs(60),
            2,
        );

        monitor.refresh().await.unwrap();
        monitor.refresh().await.unwrap();
        assert_eq!(monitor.recipients().await.unwrap().len(), 2);
    }
}
