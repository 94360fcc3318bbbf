//! Scripted in-memory API port shared by unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicUsize, Ordering},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    api::ApiPort,
    domain::{
        Chamber, Credentials, DelegateRoster, Founding, MemberRoster, Nation, NationInfo,
        Proposal, ProposalList, RegionInfo, TagRoster, TelegramResponse, VoteRoster, VoteSide,
    },
    Error, Result,
};

pub struct StubApi {
    nations: Mutex<HashMap<String, NationInfo>>,
    delegates: Mutex<Vec<Nation>>,
    members: Mutex<Vec<Nation>>,
    proposals: Mutex<Vec<Proposal>>,
    /// Successive `proposal_approvals` responses; the last one repeats.
    /// `None` means the proposal no longer exists.
    approvals: Mutex<VecDeque<Option<Vec<Nation>>>>,
    /// Successive `resolution_voters` responses; the last one repeats.
    votes: Mutex<VecDeque<Option<VoteRoster>>>,
    /// Successive membership snapshots per region; the last one repeats.
    region_members: Mutex<HashMap<String, VecDeque<Vec<Nation>>>>,
    active: Mutex<Vec<Nation>>,
    active_delay: Mutex<Option<Duration>>,
    foundings: Mutex<Vec<Founding>>,
    telegram_response: Mutex<TelegramResponse>,
    sent: Mutex<Vec<(Nation, bool)>>,
    nation_calls: AtomicUsize,
}

impl StubApi {
    pub fn new() -> Self {
        Self {
            nations: Mutex::new(HashMap::new()),
            delegates: Mutex::new(Vec::new()),
            members: Mutex::new(Vec::new()),
            proposals: Mutex::new(Vec::new()),
            approvals: Mutex::new(VecDeque::new()),
            votes: Mutex::new(VecDeque::new()),
            region_members: Mutex::new(HashMap::new()),
            active: Mutex::new(Vec::new()),
            active_delay: Mutex::new(None),
            foundings: Mutex::new(Vec::new()),
            telegram_response: Mutex::new(TelegramResponse::Queued),
            sent: Mutex::new(Vec::new()),
            nation_calls: AtomicUsize::new(0),
        }
    }

    pub fn add_nation(&self, name: &str, accepts_recruit: bool, accepts_campaign: bool) {
        let nation = Nation::new(name);
        self.nations.lock().unwrap().insert(
            nation.as_str().to_string(),
            NationInfo {
                name: nation,
                region: "the_wastes".to_string(),
                accepts_recruit,
                accepts_campaign,
            },
        );
    }

    pub fn set_delegates(&self, names: &[&str]) {
        *self.delegates.lock().unwrap() = names.iter().map(|n| Nation::new(n)).collect();
    }

    pub fn set_members(&self, names: &[&str]) {
        *self.members.lock().unwrap() = names.iter().map(|n| Nation::new(n)).collect();
    }

    pub fn push_approvals(&self, names: Option<&[&str]>) {
        self.approvals
            .lock()
            .unwrap()
            .push_back(names.map(|ns| ns.iter().map(|n| Nation::new(n)).collect()));
    }

    pub fn push_votes(&self, resolution: &str, names: &[&str]) {
        self.votes.lock().unwrap().push_back(Some(VoteRoster {
            resolution: resolution.to_string(),
            voters: names.iter().map(|n| Nation::new(n)).collect(),
        }));
    }

    pub fn push_votes_gone(&self) {
        self.votes.lock().unwrap().push_back(None);
    }

    pub fn push_region_members(&self, region: &str, names: &[&str]) {
        self.region_members
            .lock()
            .unwrap()
            .entry(region.to_string())
            .or_default()
            .push_back(names.iter().map(|n| Nation::new(n)).collect());
    }

    pub fn set_active(&self, names: &[&str]) {
        *self.active.lock().unwrap() = names.iter().map(|n| Nation::new(n)).collect();
    }

    pub fn set_active_delay(&self, delay: Duration) {
        *self.active_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_foundings(&self, entries: &[(&str, &str)]) {
        *self.foundings.lock().unwrap() = entries
            .iter()
            .map(|(nation, region)| Founding {
                nation: Nation::new(nation),
                region: region.to_string(),
            })
            .collect();
    }

    pub fn set_telegram_response(&self, response: TelegramResponse) {
        *self.telegram_response.lock().unwrap() = response;
    }

    pub fn sent_log(&self) -> Vec<(Nation, bool)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn nation_lookups(&self) -> usize {
        self.nation_calls.load(Ordering::SeqCst)
    }

    fn next_scripted<T: Clone>(queue: &Mutex<VecDeque<T>>, what: &str) -> Result<T> {
        let mut queue = queue.lock().unwrap();
        match queue.len() {
            0 => Err(Error::Api(format!("stub has no scripted {what}"))),
            1 => Ok(queue.front().cloned().unwrap()),
            _ => Ok(queue.pop_front().unwrap()),
        }
    }
}

#[async_trait]
impl ApiPort for StubApi {
    async fn nation(&self, nation: &Nation) -> Result<NationInfo> {
        self.nation_calls.fetch_add(1, Ordering::SeqCst);
        self.nations
            .lock()
            .unwrap()
            .get(nation.as_str())
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("nation {nation}")))
    }

    async fn region(&self, region: &str) -> Result<RegionInfo> {
        Err(Error::NotFound(format!("region {region}")))
    }

    async fn delegates(&self) -> Result<DelegateRoster> {
        Ok(DelegateRoster {
            delegates: self.delegates.lock().unwrap().clone(),
        })
    }

    async fn wa_members(&self) -> Result<MemberRoster> {
        Ok(MemberRoster {
            members: self.members.lock().unwrap().clone(),
        })
    }

    async fn proposals(&self) -> Result<ProposalList> {
        Ok(ProposalList {
            proposals: self.proposals.lock().unwrap().clone(),
        })
    }

    async fn proposal_approvals(&self, proposal: &str) -> Result<Vec<Nation>> {
        Self::next_scripted(&self.approvals, "approvals")?
            .ok_or_else(|| Error::NotFound(format!("proposal {proposal}")))
    }

    async fn resolution_voters(&self, chamber: Chamber, side: VoteSide) -> Result<VoteRoster> {
        Self::next_scripted(&self.votes, "votes")?.ok_or_else(|| {
            Error::NotFound(format!("{} resolution at vote {}", chamber.as_str(), side.as_str()))
        })
    }

    async fn region_nations(&self, region: &str) -> Result<Vec<Nation>> {
        let mut map = self.region_members.lock().unwrap();
        let Some(queue) = map.get_mut(region) else {
            return Ok(Vec::new());
        };
        match queue.len() {
            0 => Ok(Vec::new()),
            1 => Ok(queue.front().cloned().unwrap()),
            _ => Ok(queue.pop_front().unwrap()),
        }
    }

    async fn regions_with_tag(&self, _tag: &str) -> Result<TagRoster> {
        Ok(TagRoster { regions: Vec::new() })
    }

    async fn active_nations(&self) -> Result<Vec<Nation>> {
        let delay = *self.active_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.active.lock().unwrap().clone())
    }

    async fn recent_foundings(&self) -> Result<Vec<Founding>> {
        Ok(self.foundings.lock().unwrap().clone())
    }

    async fn send_telegram(
        &self,
        _credentials: &Credentials,
        recipient: &Nation,
        dry_run: bool,
    ) -> Result<TelegramResponse> {
        self.sent.lock().unwrap().push((recipient.clone(), dry_run));
        if dry_run {
            return Ok(TelegramResponse::Queued);
        }
        Ok(*self.telegram_response.lock().unwrap())
    }
}
