use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Consecutive refresh failures before a poll loop gives up for good.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// The overridable refresh a background monitor runs every period.
#[async_trait]
pub trait PollTask: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn refresh(&self) -> crate::Result<()>;
}

struct PollerInner {
    period: Mutex<Duration>,
    running: AtomicBool,
    ready: watch::Sender<bool>,
    failure: Mutex<Option<String>>,
    cancel: Mutex<CancellationToken>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Shared poll-loop machinery for background monitors.
///
/// One spawned task per poller, single-flight with respect to itself: the
/// next refresh is only scheduled after the previous one finished. The first
/// refresh runs immediately on start, and a one-shot latch releases once it
/// completes so dependents never read the empty pre-init state. Isolated
/// refresh failures are retried on the next period; five consecutive ones
/// are terminal.
pub struct Poller {
    inner: Arc<PollerInner>,
}

impl Poller {
    pub fn new(period: Duration) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(PollerInner {
                period: Mutex::new(period),
                running: AtomicBool::new(false),
                ready,
                failure: Mutex::new(None),
                cancel: Mutex::new(CancellationToken::new()),
                handle: Mutex::new(None),
            }),
        }
    }

    pub fn period(&self) -> Duration {
        *self.inner.period.lock().unwrap()
    }

    /// Takes effect on the next start.
    pub fn set_period(&self, period: Duration) {
        *self.inner.period.lock().unwrap() = period;
    }

    pub fn running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// The terminal failure message, if the loop has given up.
    pub fn failure(&self) -> Option<String> {
        self.inner.failure.lock().unwrap().clone()
    }

    pub fn start(&self, task: Arc<dyn PollTask>) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.inner.failure.lock().unwrap() = None;

        let cancel = CancellationToken::new();
        *self.inner.cancel.lock().unwrap() = cancel.clone();
        let period = self.period();

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut consecutive = 0u32;
            loop {
                match task.refresh().await {
                    Ok(()) => {
                        consecutive = 0;
                        inner.ready.send_replace(true);
                    }
                    Err(e) => {
                        consecutive += 1;
                        if consecutive >= MAX_CONSECUTIVE_FAILURES {
                            error!(
                                "{}: refresh failed {consecutive} times, stopping: {e}",
                                task.name()
                            );
                            *inner.failure.lock().unwrap() =
                                Some(format!("{}: {e}", task.name()));
                            break;
                        }
                        warn!(
                            "{}: refresh failed ({consecutive}/{MAX_CONSECUTIVE_FAILURES}): {e}",
                            task.name()
                        );
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(period) => {}
                }
            }
            inner.running.store(false, Ordering::SeqCst);
        });

        *self.inner.handle.lock().unwrap() = Some(handle);
    }

    /// Idempotent; safe to call from any context.
    pub fn stop(&self) {
        self.inner.cancel.lock().unwrap().cancel();
        if let Some(handle) = self.inner.handle.lock().unwrap().take() {
            handle.abort(); // best-effort
        }
        self.inner.running.store(false, Ordering::SeqCst);
    }

    /// Block until the first refresh has completed at least once.
    pub async fn wait_ready(&self) {
        let mut rx = self.inner.ready.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.inner.cancel.lock().unwrap().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct ScriptTask {
        fail_first: usize,
        calls: AtomicUsize,
    }

    impl ScriptTask {
        fn new(fail_first: usize) -> Arc<Self> {
            Arc::new(Self {
                fail_first,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PollTask for ScriptTask {
        fn name(&self) -> &'static str {
            "script"
        }

        async fn refresh(&self) -> crate::Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(crate::Error::Api("scripted failure".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn first_refresh_is_immediate_and_releases_the_latch() {
        let task = ScriptTask::new(0);
        let poller = Poller::new(Duration::from_secs(3600));
        poller.start(Arc::clone(&task) as Arc<dyn PollTask>);
        poller.wait_ready().await;
        assert_eq!(task.calls(), 1);
        assert!(poller.running());
        poller.stop();
    }

    #[tokio::test]
    async fn isolated_failures_are_retried() {
        let task = ScriptTask::new(2);
        let poller = Poller::new(Duration::from_millis(5));
        poller.start(Arc::clone(&task) as Arc<dyn PollTask>);
        poller.wait_ready().await;
        assert!(task.calls() >= 3);
        assert!(poller.failure().is_none());
        poller.stop();
    }

    #[tokio::test]
    async fn repeated_failures_are_terminal() {
        let task = ScriptTask::new(usize::MAX);
        let poller = Poller::new(Duration::from_millis(1));
        poller.start(Arc::clone(&task) as Arc<dyn PollTask>);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(poller.failure().is_some());
        assert!(!poller.running());
        assert_eq!(task.calls(), MAX_CONSECUTIVE_FAILURES as usize);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_restart_honors_new_period() {
        let task = ScriptTask::new(0);
        let poller = Poller::new(Duration::from_secs(3600));
        poller.start(Arc::clone(&task) as Arc<dyn PollTask>);
        poller.wait_ready().await;
        poller.stop();
        poller.stop();
        assert!(!poller.running());

        poller.set_period(Duration::from_millis(5));
        poller.start(Arc::clone(&task) as Arc<dyn PollTask>);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(task.calls() >= 3);
        poller.stop();
    }
}
