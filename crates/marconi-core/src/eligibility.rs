use std::sync::Arc;

use crate::{
    cache::WorldCache,
    domain::{Nation, TelegramCategory},
    Error, Result,
};

/// Decides whether a recipient currently accepts a category of telegram.
///
/// A pure read over the nation cache: an unknown nation is simply not
/// eligible, while connectivity failures propagate so the caller can retry.
#[derive(Clone)]
pub struct EligibilityChecker {
    cache: Arc<WorldCache>,
}

impl EligibilityChecker {
    pub fn new(cache: Arc<WorldCache>) -> Self {
        Self { cache }
    }

    pub async fn accepts(&self, nation: &Nation, category: TelegramCategory) -> Result<bool> {
        let info = match self.cache.nations.lookup(nation.as_str()).await {
            Ok(info) => info,
            Err(Error::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        Ok(match category {
            TelegramCategory::Recruit => info.accepts_recruit,
            TelegramCategory::Campaign => info.accepts_campaign,
            _ => true,
        })
    }
}
