use async_trait::async_trait;

use crate::{
    domain::{
        Chamber, Credentials, DelegateRoster, Founding, MemberRoster, Nation, NationInfo,
        ProposalList, RegionInfo, TagRoster, TelegramResponse, VoteRoster, VoteSide,
    },
    Result,
};

/// Port to the external web API.
///
/// One HTTP(S) request per call; implementations enforce a process-wide
/// minimum spacing between any two outbound calls, so concurrent callers
/// serialize through the adapter's gate. Errors are mapped into the core
/// taxonomy: `RateLimited`, `NotFound`, and `Api` for generic connectivity
/// failures.
#[async_trait]
pub trait ApiPort: Send + Sync {
    async fn nation(&self, nation: &Nation) -> Result<NationInfo>;
    async fn region(&self, region: &str) -> Result<RegionInfo>;

    async fn delegates(&self) -> Result<DelegateRoster>;
    async fn wa_members(&self) -> Result<MemberRoster>;
    async fn proposals(&self) -> Result<ProposalList>;
    async fn proposal_approvals(&self, proposal: &str) -> Result<Vec<Nation>>;
    async fn resolution_voters(&self, chamber: Chamber, side: VoteSide) -> Result<VoteRoster>;

    async fn region_nations(&self, region: &str) -> Result<Vec<Nation>>;
    async fn regions_with_tag(&self, tag: &str) -> Result<TagRoster>;

    /// Nations mentioned in the recent happenings feed, newest first.
    async fn active_nations(&self) -> Result<Vec<Nation>>;

    /// Recently founded nations, newest first, with their founding region.
    async fn recent_foundings(&self) -> Result<Vec<Founding>>;

    /// Dispatch one telegram. With `dry_run` the implementation must report
    /// `Queued` without touching the network.
    async fn send_telegram(
        &self,
        credentials: &Credentials,
        recipient: &Nation,
        dry_run: bool,
    ) -> Result<TelegramResponse>;
}
