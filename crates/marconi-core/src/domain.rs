use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Canonical nation identifier: lower-case, inner whitespace joined with
/// underscores. Any raw name maps to exactly one canonical form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nation(String);

impl Nation {
    pub fn new(raw: &str) -> Self {
        Self(normalize(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Nation {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Normalize a raw name. Idempotent: normalizing a canonical form is a no-op.
pub fn normalize(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// Telegram classification. Determines the minimum dispatch interval and
/// which acceptance flag on the recipient is consulted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TelegramCategory {
    Recruit,
    Campaign,
    Normal,
    None,
}

impl TelegramCategory {
    /// Default minimum interval between dispatches. Deployments usually
    /// override these via config; `None` carries no cadence guarantee.
    pub fn default_interval(self) -> Duration {
        match self {
            TelegramCategory::Recruit => Duration::from_secs(180),
            TelegramCategory::Campaign => Duration::from_secs(30),
            TelegramCategory::Normal => Duration::from_secs(30),
            TelegramCategory::None => Duration::ZERO,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "recruit" => Some(TelegramCategory::Recruit),
            "campaign" => Some(TelegramCategory::Campaign),
            "normal" => Some(TelegramCategory::Normal),
            "none" => Some(TelegramCategory::None),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TelegramCategory::Recruit => "recruit",
            TelegramCategory::Campaign => "campaign",
            TelegramCategory::Normal => "normal",
            TelegramCategory::None => "none",
        }
    }
}

/// Response code of a telegram dispatch attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TelegramResponse {
    Queued,
    RegionMismatch,
    RateLimitExceeded,
    ClientNotRegistered,
    SecretKeyMismatch,
    NoSuchTelegram,
    UnknownError,
}

impl TelegramResponse {
    pub fn is_queued(self) -> bool {
        matches!(self, TelegramResponse::Queued)
    }

    pub fn describe(self) -> &'static str {
        match self {
            TelegramResponse::Queued => "telegram queued",
            TelegramResponse::RegionMismatch => {
                "sender region does not match the registered client region"
            }
            TelegramResponse::RateLimitExceeded => "telegram API rate limit exceeded",
            TelegramResponse::ClientNotRegistered => "client key is not registered",
            TelegramResponse::SecretKeyMismatch => "secret key does not match the telegram",
            TelegramResponse::NoSuchTelegram => "no telegram exists with this id",
            TelegramResponse::UnknownError => "unrecognized response from the telegram API",
        }
    }
}

/// API credentials for dispatching telegrams.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub client_key: String,
    pub telegram_id: String,
    pub secret_key: String,
}

/// World Assembly chamber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Chamber {
    GeneralAssembly,
    SecurityCouncil,
}

impl Chamber {
    pub fn as_str(self) -> &'static str {
        match self {
            Chamber::GeneralAssembly => "ga",
            Chamber::SecurityCouncil => "sc",
        }
    }
}

/// Direction of a vote on an at-vote resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VoteSide {
    For,
    Against,
}

impl VoteSide {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteSide::For => "for",
            VoteSide::Against => "against",
        }
    }
}

/// Which approval transitions a proposal monitor reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApprovalChange {
    GivenTo,
    RemovedFrom,
}

/// Direction of cross-region movement a movement monitor reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MovementDirection {
    Into,
    OutOf,
}

impl MovementDirection {
    /// Set difference between consecutive membership snapshots for this
    /// direction: who appeared (`Into`) or disappeared (`OutOf`).
    pub fn moved(self, before: &HashSet<Nation>, after: &HashSet<Nation>) -> Vec<Nation> {
        match self {
            MovementDirection::Into => after.difference(before).cloned().collect(),
            MovementDirection::OutOf => before.difference(after).cloned().collect(),
        }
    }
}

// === Cached entities ===

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NationInfo {
    pub name: Nation,
    pub region: String,
    pub accepts_recruit: bool,
    pub accepts_campaign: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionInfo {
    pub name: String,
    pub delegate: Option<Nation>,
    pub nation_count: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DelegateRoster {
    pub delegates: Vec<Nation>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemberRoster {
    pub members: Vec<Nation>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub title: String,
    pub approvals: Vec<Nation>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposalList {
    pub proposals: Vec<Proposal>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TagRoster {
    pub regions: Vec<String>,
}

// === Feed records ===

/// One entry of the new-foundings feed, with the region it happened in so
/// foundings in sinker regions can be classified as re-foundings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Founding {
    pub nation: Nation,
    pub region: String,
}

/// Current voters in one direction on the at-vote resolution, together with
/// the resolution id so callers can detect the vote closing.
#[derive(Clone, Debug)]
pub struct VoteRoster {
    pub resolution: String,
    pub voters: Vec<Nation>,
}
