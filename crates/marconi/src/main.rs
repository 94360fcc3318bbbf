use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tracing::{error, info};

use marconi_core::{
    api::ApiPort,
    cache::WorldCache,
    config::Config,
    domain::Nation,
    eligibility::EligibilityChecker,
    monitor::{
        parse_spec, ExhaustiveMonitor, Monitor, MonitorRegistry, PolledMonitor, WaitingMonitor,
    },
    output::{Disposition, SendOutput},
    sender::{SendEngine, SendPlan},
    Error,
};
use marconi_ns::NsApi;

/// Logs every resolved recipient and keeps per-run totals.
#[derive(Default)]
struct ConsoleOutput {
    sent: AtomicU64,
    skipped: AtomicU64,
}

impl SendOutput for ConsoleOutput {
    fn processed(&self, nation: &Nation, count: u64, action: Disposition) {
        match action {
            Disposition::Sent => {
                self.sent.fetch_add(1, Ordering::SeqCst);
                info!("[{count}] sent to {nation}");
            }
            Disposition::Skipped => {
                self.skipped.fetch_add(1, Ordering::SeqCst);
                info!("[{count}] skipped {nation}");
            }
        }
    }

    fn on_terminate(&self) {
        info!(
            "run finished: {} sent, {} skipped",
            self.sent.load(Ordering::SeqCst),
            self.skipped.load(Ordering::SeqCst)
        );
    }

    fn on_error(&self, message: &str, cause: &Error) {
        error!("{message}: {cause}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    marconi_core::logging::init("marconi")?;

    let cfg = Arc::new(Config::load()?);

    let api: Arc<dyn ApiPort> =
        Arc::new(NsApi::new(cfg.user_agent.clone(), cfg.request_spacing)?);
    let cache = WorldCache::new(Arc::clone(&api), cfg.cache_ages());
    let checker = EligibilityChecker::new(Arc::clone(&cache));

    let registry =
        MonitorRegistry::new(Arc::clone(&api), Arc::clone(&cache), cfg.monitor_settings());
    let key = parse_spec(&cfg.monitor_spec)?;
    let polled = registry.obtain(&key);
    Arc::clone(&polled).start();
    info!(
        "monitor {} started{}",
        cfg.monitor_spec,
        if cfg.dry_run { " (dry run)" } else { "" }
    );

    // Never re-notify a recipient, and never serve the pre-init snapshot.
    let monitor: Arc<dyn Monitor> = Arc::new(ExhaustiveMonitor::new(Arc::new(
        WaitingMonitor::new(Arc::clone(&polled)),
    )));

    let plan = SendPlan {
        credentials: cfg.credentials(),
        category: cfg.category,
        interval: cfg.send_interval(cfg.category),
        prefetch_lead: cfg.prefetch_lead,
        dry_run: cfg.dry_run,
    };
    let engine = SendEngine::new(api, checker, monitor, Arc::new(ConsoleOutput::default()), plan);
    engine.start()?;

    let sweeper = {
        let cache = Arc::clone(&cache);
        let age = cfg.cache_sweep_age;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(3600));
            tick.tick().await; // the first tick completes immediately
            loop {
                tick.tick().await;
                cache.sweep(age).await;
            }
        })
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                if !engine.running() {
                    break;
                }
            }
        }
    }

    engine.stop();
    polled.stop();
    sweeper.abort();
    Ok(())
}
