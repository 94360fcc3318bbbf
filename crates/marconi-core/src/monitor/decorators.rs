use std::{
    collections::HashSet,
    sync::{Arc, Mutex, RwLock},
};

use async_trait::async_trait;

use crate::{
    domain::Nation,
    monitor::{Monitor, PolledMonitor},
    Error, Result,
};

/// Strips every recipient it has ever yielded from future batches.
///
/// The wrapped source can be swapped with [`rebind`](Self::rebind) while the
/// dedup history survives, so a replacement monitor cannot re-notify anyone
/// the old one already produced.
pub struct ExhaustiveMonitor {
    inner: RwLock<Arc<dyn Monitor>>,
    seen: Mutex<HashSet<Nation>>,
}

impl ExhaustiveMonitor {
    pub fn new(inner: Arc<dyn Monitor>) -> Self {
        Self {
            inner: RwLock::new(inner),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Replace the wrapped source, keeping the dedup history.
    pub fn rebind(&self, inner: Arc<dyn Monitor>) {
        *self.inner.write().unwrap() = inner;
    }

    fn inner(&self) -> Arc<dyn Monitor> {
        Arc::clone(&self.inner.read().unwrap())
    }
}

#[async_trait]
impl Monitor for ExhaustiveMonitor {
    async fn recipients(&self) -> Result<Vec<Nation>> {
        let batch = self.inner().recipients().await?;
        let mut seen = self.seen.lock().unwrap();
        Ok(batch
            .into_iter()
            .filter(|nation| seen.insert(nation.clone()))
            .collect())
    }

    fn exhausted(&self) -> bool {
        self.inner().exhausted()
    }

    fn remaining(&self) -> Option<usize> {
        self.inner().remaining()
    }
}

/// Caps cumulative yield at `cap`. Once spent, every further call raises the
/// `Exhausted` control signal instead of silently truncating.
pub struct LimitedMonitor {
    inner: Arc<dyn Monitor>,
    cap: usize,
    yielded: Mutex<usize>,
}

impl LimitedMonitor {
    pub fn new(inner: Arc<dyn Monitor>, cap: usize) -> Self {
        Self {
            inner,
            cap,
            yielded: Mutex::new(0),
        }
    }
}

#[async_trait]
impl Monitor for LimitedMonitor {
    async fn recipients(&self) -> Result<Vec<Nation>> {
        if *self.yielded.lock().unwrap() >= self.cap {
            return Err(Error::Exhausted);
        }
        let mut batch = self.inner.recipients().await?;
        let mut yielded = self.yielded.lock().unwrap();
        batch.truncate(self.cap.saturating_sub(*yielded));
        *yielded += batch.len();
        Ok(batch)
    }

    fn exhausted(&self) -> bool {
        *self.yielded.lock().unwrap() >= self.cap || self.inner.exhausted()
    }

    fn remaining(&self) -> Option<usize> {
        let room = self.cap.saturating_sub(*self.yielded.lock().unwrap());
        Some(match self.inner.remaining() {
            Some(left) => left.min(room),
            None => room,
        })
    }
}

/// Blocks every call until the wrapped background monitor has completed its
/// first refresh, so the pre-initialization empty state is never observed.
pub struct WaitingMonitor {
    inner: Arc<dyn PolledMonitor>,
}

impl WaitingMonitor {
    pub fn new(inner: Arc<dyn PolledMonitor>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Monitor for WaitingMonitor {
    async fn recipients(&self) -> Result<Vec<Nation>> {
        self.inner.wait_ready().await;
        self.inner.recipients().await
    }

    fn exhausted(&self) -> bool {
        self.inner.exhausted()
    }

    fn remaining(&self) -> Option<usize> {
        self.inner.remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{ActivityMonitor, SnapshotMonitor};
    use crate::testutil::StubApi;
    use std::time::Duration;

    #[tokio::test]
    async fn exhaustive_never_repeats_a_recipient() {
        let wrapped = ExhaustiveMonitor::new(Arc::new(SnapshotMonitor::new(["alpha", "bravo"])));
        assert_eq!(
            wrapped.recipients().await.unwrap(),
            vec![Nation::new("alpha"), Nation::new("bravo")]
        );
        assert!(wrapped.recipients().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rebind_keeps_the_dedup_history() {
        let wrapped = ExhaustiveMonitor::new(Arc::new(SnapshotMonitor::new(["alpha", "bravo"])));
        wrapped.recipients().await.unwrap();

        wrapped.rebind(Arc::new(SnapshotMonitor::new(["bravo", "charlie"])));
        assert_eq!(
            wrapped.recipients().await.unwrap(),
            vec![Nation::new("charlie")]
        );
    }

    #[tokio::test]
    async fn limited_caps_cumulative_yield_then_signals_exhaustion() {
        // The snapshot re-yields its three recipients on every call, i.e. an
        // unbounded source from the decorator's point of view.
        let limited = LimitedMonitor::new(Arc::new(SnapshotMonitor::new(["a", "b", "c"])), 5);

        assert_eq!(limited.recipients().await.unwrap().len(), 3);
        assert!(!limited.exhausted());

        assert_eq!(limited.recipients().await.unwrap().len(), 2);
        assert!(limited.exhausted());
        assert_eq!(limited.remaining(), Some(0));

        assert!(matches!(
            limited.recipients().await.unwrap_err(),
            Error::Exhausted
        ));
    }

    #[tokio::test]
    async fn waiting_blocks_until_the_first_refresh() {
        let api = Arc::new(StubApi::new());
        api.set_active(&["alpha"]);
        api.set_active_delay(Duration::from_millis(30));
        let inner =
            ActivityMonitor::new(api, Duration::from_secs(60), Duration::from_secs(3600));
        Arc::clone(&inner).start();

        // Immediately after start the poll is still in flight; the waiting
        // wrapper must serve the first real snapshot, never the empty one.
        let waiting = WaitingMonitor::new(inner.clone());
        let batch = waiting.recipients().await.unwrap();
        assert_eq!(batch, vec![Nation::new("alpha")]);
        inner.stop();
    }
}
