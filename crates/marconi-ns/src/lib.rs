//! NationStates API adapter.
//!
//! Implements the core `ApiPort` over HTTPS. All outbound traffic funnels
//! through a process-wide [`gate::RequestGate`], so the API's minimum
//! request spacing holds no matter how many monitors and send runs share
//! this client.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use marconi_core::{
    api::ApiPort,
    domain::{
        normalize, Chamber, Credentials, DelegateRoster, Founding, MemberRoster, Nation,
        NationInfo, ProposalList, RegionInfo, TagRoster, TelegramResponse, VoteRoster, VoteSide,
    },
    Error, Result,
};

pub mod gate;
mod parse;

use gate::RequestGate;

const API_BASE: &str = "https://www.nationstates.net/cgi-bin/api.cgi";

pub struct NsApi {
    http: reqwest::Client,
    base: String,
    user_agent: String,
    gate: RequestGate,
}

impl NsApi {
    pub fn new(user_agent: String, spacing: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Api(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            base: API_BASE.to_string(),
            user_agent,
            gate: RequestGate::new(spacing),
        })
    }

    /// Point the client at a different endpoint (test servers).
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    async fn get(&self, query: &[(&str, &str)]) -> Result<String> {
        self.gate.admit().await;

        let response = self
            .http
            .get(&self.base)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Api(format!("request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("?")
                .to_string();
            return Err(Error::RateLimited(format!("retry after {retry_after}s")));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound("no such entity".to_string()));
        }
        if !status.is_success() {
            return Err(Error::Api(format!("http status {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| Error::Api(format!("failed to read body: {e}")))
    }

    fn council(chamber: Chamber) -> &'static str {
        match chamber {
            Chamber::GeneralAssembly => "1",
            Chamber::SecurityCouncil => "2",
        }
    }
}

#[async_trait]
impl ApiPort for NsApi {
    async fn nation(&self, nation: &Nation) -> Result<NationInfo> {
        let body = self
            .get(&[
                ("nation", nation.as_str()),
                ("q", "region+tgcanrecruit+tgcancampaign"),
            ])
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(format!("nation {nation}")),
                other => other,
            })?;

        Ok(NationInfo {
            name: nation.clone(),
            region: normalize(&parse::require_tag(&body, "REGION")?),
            accepts_recruit: parse::flag(&body, "TGCANRECRUIT"),
            accepts_campaign: parse::flag(&body, "TGCANCAMPAIGN"),
        })
    }

    async fn region(&self, region: &str) -> Result<RegionInfo> {
        let region = normalize(region);
        let body = self
            .get(&[("region", region.as_str()), ("q", "delegate+numnations")])
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(format!("region {region}")),
                other => other,
            })?;

        // `0` marks a delegate-less region.
        let delegate = parse::require_tag(&body, "DELEGATE")
            .ok()
            .filter(|d| d != "0")
            .map(|d| Nation::new(&d));
        let nation_count = parse::require_tag(&body, "NUMNATIONS")?
            .parse::<u32>()
            .map_err(|e| Error::Api(format!("bad NUMNATIONS: {e}")))?;

        Ok(RegionInfo {
            name: region,
            delegate,
            nation_count,
        })
    }

    async fn delegates(&self) -> Result<DelegateRoster> {
        let body = self.get(&[("q", "delegates")]).await?;
        Ok(DelegateRoster {
            delegates: parse::name_list(&parse::require_tag(&body, "DELEGATES")?),
        })
    }

    async fn wa_members(&self) -> Result<MemberRoster> {
        let body = self.get(&[("wa", "1"), ("q", "members")]).await?;
        Ok(MemberRoster {
            members: parse::name_list(&parse::require_tag(&body, "MEMBERS")?),
        })
    }

    async fn proposals(&self) -> Result<ProposalList> {
        let body = self.get(&[("wa", "1"), ("q", "proposals")]).await?;
        Ok(ProposalList {
            proposals: parse::proposals(&body),
        })
    }

    async fn proposal_approvals(&self, proposal: &str) -> Result<Vec<Nation>> {
        let wanted = normalize(proposal);
        let list = self.proposals().await?;
        list.proposals
            .into_iter()
            .find(|p| p.id == wanted)
            .map(|p| p.approvals)
            .ok_or_else(|| Error::NotFound(format!("proposal {wanted}")))
    }

    async fn resolution_voters(&self, chamber: Chamber, side: VoteSide) -> Result<VoteRoster> {
        let body = self
            .get(&[("wa", Self::council(chamber)), ("q", "resolution+voters")])
            .await?;

        // An empty body section means nothing is at vote in this chamber.
        let resolution = parse::tag_text(&body, "ID").ok_or_else(|| {
            Error::NotFound(format!("no resolution at vote in {}", chamber.as_str()))
        })?;
        let voters_tag = match side {
            VoteSide::For => "VOTES_FOR",
            VoteSide::Against => "VOTES_AGAINST",
        };
        let voters = parse::tag_text(&body, voters_tag)
            .map(|raw| parse::name_list(&raw))
            .unwrap_or_default();

        Ok(VoteRoster { resolution, voters })
    }

    async fn region_nations(&self, region: &str) -> Result<Vec<Nation>> {
        let region = normalize(region);
        let body = self
            .get(&[("region", region.as_str()), ("q", "nations")])
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(format!("region {region}")),
                other => other,
            })?;
        Ok(parse::name_list(&parse::require_tag(&body, "NATIONS")?))
    }

    async fn regions_with_tag(&self, tag: &str) -> Result<TagRoster> {
        let body = self.get(&[("q", "regionsbytag"), ("tags", tag)]).await?;
        Ok(TagRoster {
            regions: parse::require_tag(&body, "REGIONS")?
                .split(',')
                .map(normalize)
                .filter(|r| !r.is_empty())
                .collect(),
        })
    }

    async fn active_nations(&self) -> Result<Vec<Nation>> {
        let body = self
            .get(&[("q", "happenings"), ("filter", "move+member+endo")])
            .await?;
        Ok(parse::happening_nations(&body))
    }

    async fn recent_foundings(&self) -> Result<Vec<Founding>> {
        let body = self.get(&[("q", "happenings"), ("filter", "founding")]).await?;
        Ok(parse::foundings(&body))
    }

    async fn send_telegram(
        &self,
        credentials: &Credentials,
        recipient: &Nation,
        dry_run: bool,
    ) -> Result<TelegramResponse> {
        if dry_run {
            debug!("dry run: telegram {} to {recipient}", credentials.telegram_id);
            return Ok(TelegramResponse::Queued);
        }

        let body = self
            .get(&[
                ("a", "sendTG"),
                ("client", credentials.client_key.as_str()),
                ("tgid", credentials.telegram_id.as_str()),
                ("key", credentials.secret_key.as_str()),
                ("to", recipient.as_str()),
            ])
            .await?;
        Ok(parse::telegram_response(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dry_run_never_touches_the_network() {
        // An unroutable base guarantees a request attempt would fail loudly.
        let api = NsApi::new("marconi test".to_string(), Duration::from_millis(1))
            .unwrap()
            .with_base("http://127.0.0.1:1/api");

        let credentials = Credentials {
            client_key: "k".to_string(),
            telegram_id: "1".to_string(),
            secret_key: "s".to_string(),
        };
        let response = api
            .send_telegram(&credentials, &Nation::new("alpha"), true)
            .await
            .unwrap();
        assert_eq!(response, TelegramResponse::Queued);
    }
}
