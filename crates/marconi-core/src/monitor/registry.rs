use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{
    api::ApiPort,
    cache::WorldCache,
    domain::{normalize, ApprovalChange, Chamber, MovementDirection, VoteSide},
    eligibility::EligibilityChecker,
    monitor::{
        ActivityMonitor, ApprovalMonitor, DelegateMonitor, FoundingMonitor, MovementMonitor,
        PolledMonitor, RecruitMonitor, VoteMonitor,
    },
    Error, Result,
};

/// Exact parameterization of a background monitor. Two requests for the same
/// key share one poll loop for the process lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MonitorKey {
    Activity,
    Foundings,
    Recruit,
    Delegates,
    Approval {
        proposal: String,
        change: ApprovalChange,
    },
    Vote {
        chamber: Chamber,
        side: VoteSide,
    },
    Movement {
        regions: Vec<String>,
        direction: MovementDirection,
    },
}

#[derive(Clone, Debug)]
pub struct MonitorSettings {
    pub poll_period: Duration,
    pub activity_window: Duration,
    pub founding_window: usize,
    pub recruit_batch: usize,
    pub include_refounds: bool,
    pub sinker_regions: Vec<String>,
    pub delegate_horizon: Duration,
    pub movement_history: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_period: Duration::from_secs(60),
            activity_window: Duration::from_secs(10 * 60),
            founding_window: 64,
            recruit_batch: 8,
            include_refounds: false,
            sinker_regions: vec![
                "balder".to_string(),
                "lazarus".to_string(),
                "osiris".to_string(),
                "the_rejected_realms".to_string(),
            ],
            delegate_horizon: Duration::from_secs(36 * 60 * 60),
            movement_history: 128,
        }
    }
}

/// Process-wide monitor registry: one live poller per distinct parameter
/// tuple, created on first request.
pub struct MonitorRegistry {
    api: Arc<dyn ApiPort>,
    cache: Arc<WorldCache>,
    checker: EligibilityChecker,
    settings: MonitorSettings,
    live: Mutex<HashMap<MonitorKey, Arc<dyn PolledMonitor>>>,
    foundings: Mutex<Option<Arc<FoundingMonitor>>>,
}

impl MonitorRegistry {
    pub fn new(api: Arc<dyn ApiPort>, cache: Arc<WorldCache>, settings: MonitorSettings) -> Self {
        Self {
            api,
            checker: EligibilityChecker::new(Arc::clone(&cache)),
            cache,
            settings,
            live: Mutex::new(HashMap::new()),
            foundings: Mutex::new(None),
        }
    }

    pub fn obtain(&self, key: &MonitorKey) -> Arc<dyn PolledMonitor> {
        let mut live = self.live.lock().unwrap();
        if let Some(existing) = live.get(key) {
            return Arc::clone(existing);
        }
        let built = self.build(key);
        live.insert(key.clone(), Arc::clone(&built));
        built
    }

    /// The founding feed backs both the foundings and recruit monitors, so
    /// they share a single poll loop.
    fn founding_feed(&self) -> Arc<FoundingMonitor> {
        let mut slot = self.foundings.lock().unwrap();
        if let Some(existing) = slot.as_ref() {
            return Arc::clone(existing);
        }
        let s = &self.settings;
        let built = FoundingMonitor::new(
            Arc::clone(&self.api),
            s.poll_period,
            s.founding_window,
            &s.sinker_regions,
            s.include_refounds,
        );
        *slot = Some(Arc::clone(&built));
        built
    }

    fn build(&self, key: &MonitorKey) -> Arc<dyn PolledMonitor> {
        let s = &self.settings;
        match key {
            MonitorKey::Activity => {
                ActivityMonitor::new(Arc::clone(&self.api), s.activity_window, s.poll_period)
            }
            MonitorKey::Foundings => self.founding_feed(),
            MonitorKey::Recruit => RecruitMonitor::new(
                self.founding_feed(),
                self.checker.clone(),
                s.recruit_batch,
            ),
            MonitorKey::Delegates => {
                DelegateMonitor::new(Arc::clone(&self.cache), s.poll_period, s.delegate_horizon)
            }
            MonitorKey::Approval { proposal, change } => {
                ApprovalMonitor::new(Arc::clone(&self.api), proposal, *change, s.poll_period)
            }
            MonitorKey::Vote { chamber, side } => {
                VoteMonitor::new(Arc::clone(&self.api), *chamber, *side, s.poll_period)
            }
            MonitorKey::Movement { regions, direction } => MovementMonitor::new(
                Arc::clone(&self.api),
                regions,
                *direction,
                s.poll_period,
                s.movement_history,
            ),
        }
    }
}

/// Parse a textual monitor spec into its typed key.
///
/// Accepted forms:
///   activity | foundings | recruit | delegates
///   approvals:given:<proposal> | approvals:removed:<proposal>
///   votes:<ga|sc>:<for|against>
///   movement:<into|out_of>:<region>[,<region>...]
pub fn parse_spec(spec: &str) -> Result<MonitorKey> {
    let parts: Vec<&str> = spec.trim().split(':').map(str::trim).collect();
    match parts.as_slice() {
        ["activity"] => Ok(MonitorKey::Activity),
        ["foundings"] => Ok(MonitorKey::Foundings),
        ["recruit"] => Ok(MonitorKey::Recruit),
        ["delegates"] => Ok(MonitorKey::Delegates),
        ["approvals", change, proposal] => {
            let change = match *change {
                "given" => ApprovalChange::GivenTo,
                "removed" => ApprovalChange::RemovedFrom,
                other => {
                    return Err(Error::Parse(format!(
                        "approval change must be 'given' or 'removed', got {other:?}"
                    )))
                }
            };
            if proposal.is_empty() {
                return Err(Error::Parse("approvals spec is missing a proposal id".into()));
            }
            Ok(MonitorKey::Approval {
                proposal: normalize(proposal),
                change,
            })
        }
        ["votes", chamber, side] => {
            let chamber = match *chamber {
                "ga" => Chamber::GeneralAssembly,
                "sc" => Chamber::SecurityCouncil,
                other => {
                    return Err(Error::Parse(format!(
                        "chamber must be 'ga' or 'sc', got {other:?}"
                    )))
                }
            };
            let side = match *side {
                "for" => VoteSide::For,
                "against" => VoteSide::Against,
                other => {
                    return Err(Error::Parse(format!(
                        "vote side must be 'for' or 'against', got {other:?}"
                    )))
                }
            };
            Ok(MonitorKey::Vote { chamber, side })
        }
        ["movement", direction, regions] => {
            let direction = match *direction {
                "into" => MovementDirection::Into,
                "out_of" => MovementDirection::OutOf,
                other => {
                    return Err(Error::Parse(format!(
                        "movement direction must be 'into' or 'out_of', got {other:?}"
                    )))
                }
            };
            let regions: Vec<String> = regions
                .split(',')
                .map(normalize)
                .filter(|r| !r.is_empty())
                .collect();
            if regions.is_empty() {
                return Err(Error::Parse("movement spec is missing regions".into()));
            }
            Ok(MonitorKey::Movement { regions, direction })
        }
        _ => Err(Error::Parse(format!("unrecognized monitor spec {spec:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheAges;
    use crate::testutil::StubApi;

    fn registry() -> MonitorRegistry {
        let api = Arc::new(StubApi::new()) as Arc<dyn ApiPort>;
        let cache = WorldCache::new(Arc::clone(&api), CacheAges::default());
        MonitorRegistry::new(api, cache, MonitorSettings::default())
    }

    #[test]
    fn same_parameters_share_one_monitor() {
        let registry = registry();
        let key = MonitorKey::Movement {
            regions: vec!["europe".to_string()],
            direction: MovementDirection::OutOf,
        };
        let a = registry.obtain(&key);
        let b = registry.obtain(&key);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn different_parameters_get_their_own_monitor() {
        let registry = registry();
        let out = registry.obtain(&MonitorKey::Movement {
            regions: vec!["europe".to_string()],
            direction: MovementDirection::OutOf,
        });
        let into = registry.obtain(&MonitorKey::Movement {
            regions: vec!["europe".to_string()],
            direction: MovementDirection::Into,
        });
        assert!(!Arc::ptr_eq(&out, &into));
    }

    #[test]
    fn spec_strings_parse_into_typed_keys() {
        assert_eq!(parse_spec("activity").unwrap(), MonitorKey::Activity);
        assert_eq!(
            parse_spec("approvals:given:Recall The Delegate").unwrap(),
            MonitorKey::Approval {
                proposal: "recall_the_delegate".to_string(),
                change: ApprovalChange::GivenTo,
            }
        );
        assert_eq!(
            parse_spec("votes:sc:against").unwrap(),
            MonitorKey::Vote {
                chamber: Chamber::SecurityCouncil,
                side: VoteSide::Against,
            }
        );
        assert_eq!(
            parse_spec("movement:out_of:Europe, The North Pacific").unwrap(),
            MonitorKey::Movement {
                regions: vec!["europe".to_string(), "the_north_pacific".to_string()],
                direction: MovementDirection::OutOf,
            }
        );
    }

    #[test]
    fn invalid_specs_fail_with_a_parse_error() {
        for bad in [
            "",
            "bogus",
            "approvals:given",
            "approvals:maybe:prop",
            "votes:un:for",
            "votes:ga:abstain",
            "movement:sideways:europe",
            "movement:into:",
        ] {
            let err = parse_spec(bad).unwrap_err();
            assert!(matches!(err, Error::Parse(_)), "{bad:?} should not parse");
        }
    }
}
