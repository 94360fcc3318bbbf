use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    api::ApiPort,
    domain::{Credentials, Nation, TelegramCategory},
    eligibility::EligibilityChecker,
    monitor::Monitor,
    output::{Disposition, SendOutput},
    Error, Result,
};

/// Consecutive transient tick failures before a run aborts.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

#[derive(Clone, Debug)]
pub struct SendPlan {
    pub credentials: Credentials,
    pub category: TelegramCategory,
    /// Minimum spacing between dispatches. `Duration::ZERO` (category
    /// `None`) carries no cadence guarantee.
    pub interval: Duration,
    /// How far ahead of a tick the next candidate is resolved, so external
    /// lookups do not delay the dispatch itself.
    pub prefetch_lead: Duration,
    pub dry_run: bool,
}

impl SendPlan {
    pub fn for_category(credentials: Credentials, category: TelegramCategory) -> Self {
        Self {
            credentials,
            category,
            interval: category.default_interval(),
            prefetch_lead: Duration::from_secs(10),
            dry_run: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

struct EngineState {
    phase: Phase,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    terminated: bool,
}

/// The per-run record of resolved recipients. `sent` and `skipped` stay
/// disjoint; once a nation appears in either it is never reconsidered by
/// this run.
#[derive(Default)]
struct SendRecord {
    sent: HashSet<Nation>,
    skipped: HashSet<Nation>,
    count: u64,
}

impl SendRecord {
    fn processed(&self, nation: &Nation) -> bool {
        self.sent.contains(nation) || self.skipped.contains(nation)
    }
}

enum Tick {
    Continue,
    Exhausted,
}

/// Drives one send campaign at the plan's cadence: each tick resolves the
/// next eligible, unprocessed recipient from the monitor and dispatches to
/// it. Exhaustion stops the run gracefully; dispatch rejections and repeated
/// connectivity failures stop it through the error hook.
pub struct SendEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    api: Arc<dyn ApiPort>,
    checker: EligibilityChecker,
    monitor: Arc<dyn Monitor>,
    output: Arc<dyn SendOutput>,
    plan: SendPlan,
    state: Mutex<EngineState>,
}

impl SendEngine {
    pub fn new(
        api: Arc<dyn ApiPort>,
        checker: EligibilityChecker,
        monitor: Arc<dyn Monitor>,
        output: Arc<dyn SendOutput>,
        plan: SendPlan,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                api,
                checker,
                monitor,
                output,
                plan,
                state: Mutex::new(EngineState {
                    phase: Phase::Idle,
                    cancel: CancellationToken::new(),
                    handle: None,
                    terminated: false,
                }),
            }),
        }
    }

    /// Begin the run; the first tick executes immediately. Rejects a second
    /// start while running. A stopped engine can start a fresh run with a
    /// clean sent/skipped record.
    pub fn start(&self) -> Result<()> {
        let mut st = self.inner.state.lock().unwrap();
        if st.phase == Phase::Running {
            return Err(Error::Config("a send run is already in progress".to_string()));
        }
        st.phase = Phase::Running;
        st.terminated = false;

        let cancel = CancellationToken::new();
        st.cancel = cancel.clone();
        let inner = Arc::clone(&self.inner);
        st.handle = Some(tokio::spawn(async move {
            run(inner, cancel).await;
        }));
        Ok(())
    }

    /// Cancel the run and fire the termination hook. Idempotent; also safe
    /// to reach from the run's own failure path.
    pub fn stop(&self) {
        finish(&self.inner, None);
    }

    pub fn running(&self) -> bool {
        self.inner.state.lock().unwrap().phase == Phase::Running
    }
}

fn finish(inner: &Arc<EngineInner>, failure: Option<(&str, &Error)>) {
    if let Some((message, cause)) = failure {
        inner.output.on_error(message, cause);
    }
    let fire = {
        let mut st = inner.state.lock().unwrap();
        st.cancel.cancel();
        st.handle.take(); // the loop exits at its next cancellation point
        st.phase = Phase::Stopped;
        let fire = !st.terminated;
        st.terminated = true;
        fire
    };
    if fire {
        inner.output.on_terminate();
    }
}

async fn run(inner: Arc<EngineInner>, cancel: CancellationToken) {
    let mut record = SendRecord::default();
    let mut queued: Option<Nation> = None;
    let mut failures = 0u32;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        match tick(&inner, &mut record, &mut queued).await {
            Ok(Tick::Continue) => failures = 0,
            Ok(Tick::Exhausted) => {
                info!(
                    "recipient source exhausted, stopping after {} processed",
                    record.count
                );
                finish(&inner, None);
                return;
            }
            Err(e) if e.is_transient() => {
                failures += 1;
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    let message = format!("{failures} consecutive failures, aborting the run");
                    finish(&inner, Some((message.as_str(), &e)));
                    return;
                }
                warn!("tick failed ({failures}/{MAX_CONSECUTIVE_FAILURES}), will retry: {e}");
            }
            Err(e) => {
                finish(&inner, Some(("send run aborted", &e)));
                return;
            }
        }

        let interval = inner.plan.interval;
        if interval.is_zero() {
            tokio::task::yield_now().await;
            continue;
        }

        // Wait out the cadence, resolving the next candidate shortly before
        // the tick that needs it.
        let lead = inner.plan.prefetch_lead.min(interval);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(interval - lead) => {}
        }
        if queued.is_none() {
            match find_next(&inner, &mut record).await {
                Ok(next) => queued = next,
                Err(Error::Exhausted) => {} // the next tick classifies this
                Err(e) => warn!("prefetch failed, deferring to the next tick: {e}"),
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(lead) => {}
        }
    }
}

async fn tick(
    inner: &Arc<EngineInner>,
    record: &mut SendRecord,
    queued: &mut Option<Nation>,
) -> Result<Tick> {
    if queued.is_none() {
        *queued = match find_next(inner, record).await {
            Ok(next) => next,
            Err(Error::Exhausted) => return Ok(Tick::Exhausted),
            Err(e) => return Err(e),
        };
    }

    let Some(nation) = queued.take() else {
        if inner.monitor.exhausted() {
            return Ok(Tick::Exhausted);
        }
        // The monitor simply has nothing ready yet; not an error.
        return Ok(Tick::Continue);
    };

    let response = match inner
        .api
        .send_telegram(&inner.plan.credentials, &nation, inner.plan.dry_run)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            *queued = Some(nation); // retry the same candidate next tick
            return Err(e);
        }
    };

    if response.is_queued() {
        record.sent.insert(nation.clone());
        record.count += 1;
        inner
            .output
            .processed(&nation, record.count, Disposition::Sent);
        info!("telegram queued for {nation} ({} processed)", record.count);
        return Ok(Tick::Continue);
    }

    Err(Error::Dispatch {
        code: response,
        reason: format!(
            "{} ({} telegram to {nation})",
            response.describe(),
            inner.plan.category.as_str()
        ),
    })
}

/// Resolve the first eligible, unprocessed recipient from the monitor.
/// Everyone visited but rejected is recorded as skipped and reported
/// immediately.
async fn find_next(inner: &Arc<EngineInner>, record: &mut SendRecord) -> Result<Option<Nation>> {
    let batch = inner.monitor.recipients().await?;
    for nation in batch {
        if record.processed(&nation) {
            continue;
        }
        if inner.checker.accepts(&nation, inner.plan.category).await? {
            return Ok(Some(nation));
        }
        record.skipped.insert(nation.clone());
        record.count += 1;
        inner
            .output
            .processed(&nation, record.count, Disposition::Skipped);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheAges, WorldCache};
    use crate::domain::TelegramResponse;
    use crate::monitor::{LimitedMonitor, SnapshotMonitor};
    use crate::testutil::StubApi;

    struct RecordingOutput {
        events: Mutex<Vec<(Nation, u64, Disposition)>>,
        errors: Mutex<Vec<String>>,
        terminations: Mutex<u32>,
    }

    impl RecordingOutput {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                errors: Mutex::new(Vec::new()),
                terminations: Mutex::new(0),
            })
        }

        fn events(&self) -> Vec<(Nation, u64, Disposition)> {
            self.events.lock().unwrap().clone()
        }

        fn errors(&self) -> Vec<String> {
            self.errors.lock().unwrap().clone()
        }

        fn terminations(&self) -> u32 {
            *self.terminations.lock().unwrap()
        }
    }

    impl SendOutput for RecordingOutput {
        fn processed(&self, nation: &Nation, count: u64, action: Disposition) {
            self.events
                .lock()
                .unwrap()
                .push((nation.clone(), count, action));
        }

        fn on_terminate(&self) {
            *self.terminations.lock().unwrap() += 1;
        }

        fn on_error(&self, message: &str, cause: &Error) {
            self.errors.lock().unwrap().push(format!("{message}: {cause}"));
        }
    }

    fn test_plan(dry_run: bool) -> SendPlan {
        SendPlan {
            credentials: Credentials {
                client_key: "client".to_string(),
                telegram_id: "12345".to_string(),
                secret_key: "secret".to_string(),
            },
            category: TelegramCategory::Recruit,
            interval: Duration::from_millis(40),
            prefetch_lead: Duration::from_millis(10),
            dry_run,
        }
    }

    fn engine_with(
        api: Arc<StubApi>,
        monitor: Arc<dyn Monitor>,
        output: Arc<RecordingOutput>,
        plan: SendPlan,
    ) -> SendEngine {
        let cache = WorldCache::new(api.clone() as Arc<dyn ApiPort>, CacheAges::default());
        SendEngine::new(api, EligibilityChecker::new(cache), monitor, output, plan)
    }

    #[tokio::test]
    async fn dry_run_dispatches_in_order_and_only_terminates_on_stop() {
        let api = Arc::new(StubApi::new());
        api.add_nation("alpha", true, true);
        api.add_nation("bravo", true, true);
        let output = RecordingOutput::new();
        let monitor = Arc::new(SnapshotMonitor::new(["alpha", "bravo"]));
        let engine = engine_with(api.clone(), monitor, Arc::clone(&output), test_plan(true));

        engine.start().unwrap();
        tokio::time::sleep(Duration::from_millis(110)).await;

        assert_eq!(
            output.events(),
            vec![
                (Nation::new("alpha"), 1, Disposition::Sent),
                (Nation::new("bravo"), 2, Disposition::Sent),
            ]
        );
        assert_eq!(output.terminations(), 0);
        assert!(engine.running());

        engine.stop();
        assert_eq!(output.terminations(), 1);
        assert!(!engine.running());

        // Dry run still exercised the dispatch port, without real sends.
        assert!(api.sent_log().iter().all(|(_, dry)| *dry));
    }

    #[tokio::test]
    async fn sent_and_skipped_stay_disjoint_and_unrepeated() {
        let api = Arc::new(StubApi::new());
        api.add_nation("alpha", true, true);
        api.add_nation("bravo", false, true); // recruit-blocked
        api.add_nation("charlie", true, true);
        let output = RecordingOutput::new();
        // Duplicates in the feed must not produce duplicate reports.
        let monitor = Arc::new(SnapshotMonitor::new(["alpha", "bravo", "alpha", "charlie"]));
        let engine = engine_with(api, monitor, Arc::clone(&output), test_plan(true));

        engine.start().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        engine.stop();

        let events = output.events();
        assert_eq!(
            events,
            vec![
                (Nation::new("alpha"), 1, Disposition::Sent),
                (Nation::new("bravo"), 2, Disposition::Skipped),
                (Nation::new("charlie"), 3, Disposition::Sent),
            ]
        );
        let mut names: Vec<_> = events.iter().map(|(n, _, _)| n.clone()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), events.len());
    }

    #[tokio::test]
    async fn exhaustion_stops_gracefully() {
        let api = Arc::new(StubApi::new());
        api.add_nation("alpha", true, true);
        let output = RecordingOutput::new();
        let monitor = Arc::new(LimitedMonitor::new(
            Arc::new(SnapshotMonitor::new(["alpha"])),
            1,
        ));
        let engine = engine_with(api, monitor, Arc::clone(&output), test_plan(true));

        engine.start().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(output.events().len(), 1);
        assert_eq!(output.terminations(), 1);
        assert!(output.errors().is_empty());
        assert!(!engine.running());
    }

    #[tokio::test]
    async fn dispatch_rejection_is_fatal() {
        let api = Arc::new(StubApi::new());
        api.add_nation("alpha", true, true);
        api.set_telegram_response(TelegramResponse::SecretKeyMismatch);
        let output = RecordingOutput::new();
        let monitor = Arc::new(SnapshotMonitor::new(["alpha"]));
        let engine = engine_with(api, monitor, Arc::clone(&output), test_plan(false));

        engine.start().unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let errors = output.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("secret key"), "{errors:?}");
        assert_eq!(output.terminations(), 1);
        assert!(!engine.running());
        assert!(output.events().is_empty());
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_running() {
        let api = Arc::new(StubApi::new());
        let output = RecordingOutput::new();
        let monitor = Arc::new(SnapshotMonitor::new(Vec::<String>::new()));
        let engine = engine_with(api, monitor, output, test_plan(true));

        engine.start().unwrap();
        assert!(engine.start().is_err());
        engine.stop();

        // A stopped engine may start a fresh run.
        engine.start().unwrap();
        engine.stop();
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let api = Arc::new(StubApi::new());
        let output = RecordingOutput::new();
        let monitor = Arc::new(SnapshotMonitor::new(Vec::<String>::new()));
        let engine = engine_with(api, monitor, Arc::clone(&output), test_plan(true));

        engine.start().unwrap();
        engine.stop();
        engine.stop();
        assert_eq!(output.terminations(), 1);
    }
}
