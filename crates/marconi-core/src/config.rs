use std::{env, fs, path::Path, time::Duration};

use crate::{
    cache::CacheAges,
    domain::{Credentials, TelegramCategory},
    errors::Error,
    monitor::MonitorSettings,
    Result,
};

/// Typed runtime configuration, loaded from environment variables (with
/// `.env` pickup). Anything optional falls back to conservative defaults.
#[derive(Clone, Debug)]
pub struct Config {
    // Dispatch credentials
    pub client_key: String,
    pub telegram_id: String,
    pub secret_key: String,

    // Sending
    pub category: TelegramCategory,
    pub dry_run: bool,
    pub recruit_interval: Duration,
    pub campaign_interval: Duration,
    pub normal_interval: Duration,
    pub prefetch_lead: Duration,

    // API
    pub user_agent: String,
    pub request_spacing: Duration,

    // Monitors
    pub monitor_spec: String,
    pub poll_period: Duration,
    pub activity_window: Duration,
    pub founding_window: usize,
    pub recruit_batch: usize,
    pub include_refounds: bool,
    pub sinker_regions: Vec<String>,
    pub delegate_horizon: Duration,
    pub movement_history: usize,

    // Caches
    pub nation_max_age: Duration,
    pub region_max_age: Duration,
    pub roster_max_age: Duration,
    pub cache_sweep_age: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let dry_run = env_bool("MARCONI_DRY_RUN").unwrap_or(false);

        // The API requires an identifying user agent on every request.
        let user_agent = env_str("MARCONI_USER_AGENT")
            .and_then(non_empty)
            .ok_or_else(|| {
                Error::Config("MARCONI_USER_AGENT environment variable is required".to_string())
            })?;

        let client_key = env_str("MARCONI_CLIENT_KEY").unwrap_or_default();
        let telegram_id = env_str("MARCONI_TELEGRAM_ID").unwrap_or_default();
        let secret_key = env_str("MARCONI_SECRET_KEY").unwrap_or_default();
        if !dry_run
            && (client_key.trim().is_empty()
                || telegram_id.trim().is_empty()
                || secret_key.trim().is_empty())
        {
            return Err(Error::Config(
                "MARCONI_CLIENT_KEY, MARCONI_TELEGRAM_ID and MARCONI_SECRET_KEY are required \
                 unless MARCONI_DRY_RUN is set"
                    .to_string(),
            ));
        }

        let category = match env_str("MARCONI_CATEGORY") {
            Some(raw) => TelegramCategory::parse(&raw).ok_or_else(|| {
                Error::Config(format!("MARCONI_CATEGORY: unknown category {raw:?}"))
            })?,
            None => TelegramCategory::Recruit,
        };

        let recruit_interval = env_secs("MARCONI_RECRUIT_INTERVAL_SECS")
            .unwrap_or_else(|| TelegramCategory::Recruit.default_interval());
        let campaign_interval = env_secs("MARCONI_CAMPAIGN_INTERVAL_SECS")
            .unwrap_or_else(|| TelegramCategory::Campaign.default_interval());
        let normal_interval = env_secs("MARCONI_NORMAL_INTERVAL_SECS")
            .unwrap_or_else(|| TelegramCategory::Normal.default_interval());
        let prefetch_lead =
            env_secs("MARCONI_PREFETCH_LEAD_SECS").unwrap_or(Duration::from_secs(10));

        let request_spacing =
            Duration::from_millis(env_u64("MARCONI_REQUEST_SPACING_MS").unwrap_or(700));

        let monitor_defaults = MonitorSettings::default();
        let monitor_spec = env_str("MARCONI_MONITOR").unwrap_or_else(|| "recruit".to_string());
        let poll_period = env_secs("MARCONI_POLL_PERIOD_SECS").unwrap_or(monitor_defaults.poll_period);
        let activity_window =
            env_secs("MARCONI_ACTIVITY_WINDOW_SECS").unwrap_or(monitor_defaults.activity_window);
        let founding_window =
            env_usize("MARCONI_FOUNDING_WINDOW").unwrap_or(monitor_defaults.founding_window);
        let recruit_batch =
            env_usize("MARCONI_RECRUIT_BATCH").unwrap_or(monitor_defaults.recruit_batch);
        let include_refounds =
            env_bool("MARCONI_INCLUDE_REFOUNDS").unwrap_or(monitor_defaults.include_refounds);
        let sinker_regions = parse_csv_lower(env_str("MARCONI_SINKER_REGIONS"))
            .unwrap_or(monitor_defaults.sinker_regions);
        let delegate_horizon =
            env_secs("MARCONI_DELEGATE_HORIZON_SECS").unwrap_or(monitor_defaults.delegate_horizon);
        let movement_history =
            env_usize("MARCONI_MOVEMENT_HISTORY").unwrap_or(monitor_defaults.movement_history);

        let cache_defaults = CacheAges::default();
        let nation_max_age =
            env_secs("MARCONI_NATION_MAX_AGE_SECS").unwrap_or(cache_defaults.nation);
        let region_max_age =
            env_secs("MARCONI_REGION_MAX_AGE_SECS").unwrap_or(cache_defaults.region);
        let roster_max_age =
            env_secs("MARCONI_ROSTER_MAX_AGE_SECS").unwrap_or(cache_defaults.roster);
        let cache_sweep_age =
            env_secs("MARCONI_CACHE_SWEEP_AGE_SECS").unwrap_or(Duration::from_secs(6 * 60 * 60));

        Ok(Self {
            client_key,
            telegram_id,
            secret_key,
            category,
            dry_run,
            recruit_interval,
            campaign_interval,
            normal_interval,
            prefetch_lead,
            user_agent,
            request_spacing,
            monitor_spec,
            poll_period,
            activity_window,
            founding_window,
            recruit_batch,
            include_refounds,
            sinker_regions,
            delegate_horizon,
            movement_history,
            nation_max_age,
            region_max_age,
            roster_max_age,
            cache_sweep_age,
        })
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            client_key: self.client_key.clone(),
            telegram_id: self.telegram_id.clone(),
            secret_key: self.secret_key.clone(),
        }
    }

    /// The effective cadence for a category, with config overrides applied.
    pub fn send_interval(&self, category: TelegramCategory) -> Duration {
        match category {
            TelegramCategory::Recruit => self.recruit_interval,
            TelegramCategory::Campaign => self.campaign_interval,
            TelegramCategory::Normal => self.normal_interval,
            TelegramCategory::None => Duration::ZERO,
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_period: self.poll_period,
            activity_window: self.activity_window,
            founding_window: self.founding_window,
            recruit_batch: self.recruit_batch,
            include_refounds: self.include_refounds,
            sinker_regions: self.sinker_regions.clone(),
            delegate_horizon: self.delegate_horizon,
            movement_history: self.movement_history,
        }
    }

    pub fn cache_ages(&self) -> CacheAges {
        CacheAges {
            nation: self.nation_max_age,
            region: self.region_max_age,
            roster: self.roster_max_age,
        }
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_u64(key).map(Duration::from_secs)
}

fn parse_csv_lower(v: Option<String>) -> Option<Vec<String>> {
    let v = v?;
    let out = v
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
