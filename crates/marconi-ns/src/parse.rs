//! Field extraction from API response bodies.
//!
//! The shards this dispatcher reads are flat name lists and scalar flags, so
//! a handful of anchored patterns covers them without a full XML pipeline.

use regex::Regex;

use marconi_core::{
    domain::{Founding, Nation, Proposal, TelegramResponse},
    Error, Result,
};

pub fn tag_text(body: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"(?s)<{0}[^>]*>(.*?)</{0}>", regex::escape(tag));
    let re = Regex::new(&pattern).ok()?;
    re.captures(body).map(|c| c[1].trim().to_string())
}

pub fn require_tag(body: &str, tag: &str) -> Result<String> {
    tag_text(body, tag).ok_or_else(|| Error::Api(format!("response is missing <{tag}>")))
}

/// `1` means yes everywhere in this API.
pub fn flag(body: &str, tag: &str) -> bool {
    tag_text(body, tag).map(|v| v == "1").unwrap_or(false)
}

/// Name rosters arrive either colon- or comma-separated depending on shard.
pub fn name_list(raw: &str) -> Vec<Nation> {
    raw.split([':', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Nation::new)
        .collect()
}

/// Nations referenced by happenings lines, in feed order, de-duplicated.
pub fn happening_nations(body: &str) -> Vec<Nation> {
    let re = Regex::new(r"@@([A-Za-z0-9_ -]+?)@@").expect("static pattern");
    let mut out = Vec::new();
    for capture in re.captures_iter(body) {
        let nation = Nation::new(&capture[1]);
        if !out.contains(&nation) {
            out.push(nation);
        }
    }
    out
}

/// Founding happenings: `@@nation@@ was founded in %%region%%`.
pub fn foundings(body: &str) -> Vec<Founding> {
    let re = Regex::new(r"@@([A-Za-z0-9_ -]+?)@@ was (?:founded|refounded) in %%([A-Za-z0-9_ -]+?)%%")
        .expect("static pattern");
    let mut out = Vec::new();
    for capture in re.captures_iter(body) {
        let founding = Founding {
            nation: Nation::new(&capture[1]),
            region: capture[2].to_string(),
        };
        if !out.iter().any(|f: &Founding| f.nation == founding.nation) {
            out.push(founding);
        }
    }
    out
}

/// Every `<PROPOSAL id="...">` block with its name and approval roster.
pub fn proposals(body: &str) -> Vec<Proposal> {
    let re = Regex::new(r#"(?s)<PROPOSAL[^>]*\bid="([^"]+)"[^>]*>(.*?)</PROPOSAL>"#)
        .expect("static pattern");
    re.captures_iter(body)
        .map(|capture| {
            let block = &capture[2];
            Proposal {
                id: capture[1].trim().to_lowercase(),
                title: tag_text(block, "NAME").unwrap_or_default(),
                approvals: tag_text(block, "APPROVALS")
                    .map(|raw| name_list(&raw))
                    .unwrap_or_default(),
            }
        })
        .collect()
}

/// Map a sendTG response body to its code. The happy path is a body starting
/// with `queued`; everything else is matched on the error phrases the API
/// uses, falling back to `UnknownError`.
pub fn telegram_response(body: &str) -> TelegramResponse {
    let text = body.trim().to_lowercase();
    if text.starts_with("queued") {
        return TelegramResponse::Queued;
    }
    if text.contains("region mismatch") {
        return TelegramResponse::RegionMismatch;
    }
    if text.contains("ratelimit") || text.contains("rate limit") {
        return TelegramResponse::RateLimitExceeded;
    }
    if text.contains("client not registered") {
        return TelegramResponse::ClientNotRegistered;
    }
    if text.contains("incorrect secret key") || text.contains("secret key") {
        return TelegramResponse::SecretKeyMismatch;
    }
    if text.contains("no such telegram") || text.contains("telegram does not exist") {
        return TelegramResponse::NoSuchTelegram;
    }
    TelegramResponse::UnknownError
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_extraction_and_flags() {
        let body = "<NATION><REGION>The North Pacific</REGION><TGCANRECRUIT>1</TGCANRECRUIT>\
                    <TGCANCAMPAIGN>0</TGCANCAMPAIGN></NATION>";
        assert_eq!(tag_text(body, "REGION").unwrap(), "The North Pacific");
        assert!(flag(body, "TGCANRECRUIT"));
        assert!(!flag(body, "TGCANCAMPAIGN"));
        assert!(tag_text(body, "ABSENT").is_none());
        assert!(require_tag(body, "ABSENT").is_err());
    }

    #[test]
    fn name_lists_split_on_either_separator() {
        let colon = name_list("alpha:bravo:charlie");
        let comma = name_list("Alpha, Bravo ,charlie");
        assert_eq!(colon, comma);
        assert_eq!(colon.len(), 3);
        assert_eq!(colon[0], Nation::new("alpha"));
    }

    #[test]
    fn happenings_yield_ordered_unique_nations() {
        let body = "<EVENT><TEXT>@@testlandia@@ moved to %%the_north_pacific%%.</TEXT></EVENT>\
                    <EVENT><TEXT>@@Blue Bubble@@ endorsed @@testlandia@@.</TEXT></EVENT>";
        let nations = happening_nations(body);
        assert_eq!(
            nations,
            vec![Nation::new("testlandia"), Nation::new("blue_bubble")]
        );
    }

    #[test]
    fn founding_lines_carry_the_region() {
        let body = "<EVENT><TEXT>@@new_dawn@@ was founded in %%the_wastes%%.</TEXT></EVENT>\
                    <EVENT><TEXT>@@phoenix@@ was refounded in %%lazarus%%.</TEXT></EVENT>";
        let found = foundings(body);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].nation, Nation::new("new_dawn"));
        assert_eq!(found[0].region, "the_wastes");
        assert_eq!(found[1].region, "lazarus");
    }

    #[test]
    fn proposal_blocks_parse_id_and_approvals() {
        let body = r#"<PROPOSALS>
            <PROPOSAL id="Recall_The_Delegate"><NAME>Recall the Delegate</NAME>
            <APPROVALS>alpha:bravo</APPROVALS></PROPOSAL>
            <PROPOSAL id="second_one"><NAME>Second One</NAME><APPROVALS></APPROVALS></PROPOSAL>
        </PROPOSALS>"#;
        let list = proposals(body);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "recall_the_delegate");
        assert_eq!(list[0].approvals.len(), 2);
        assert!(list[1].approvals.is_empty());
    }

    #[test]
    fn telegram_response_codes() {
        assert_eq!(telegram_response("queued"), TelegramResponse::Queued);
        assert_eq!(telegram_response("  Queued.\n"), TelegramResponse::Queued);
        assert_eq!(
            telegram_response("error: region mismatch between telegram and client"),
            TelegramResponse::RegionMismatch
        );
        assert_eq!(
            telegram_response("error: ratelimit exceeded"),
            TelegramResponse::RateLimitExceeded
        );
        assert_eq!(
            telegram_response("error: client not registered for api"),
            TelegramResponse::ClientNotRegistered
        );
        assert_eq!(
            telegram_response("error: incorrect secret key"),
            TelegramResponse::SecretKeyMismatch
        );
        assert_eq!(
            telegram_response("error: no such telegram"),
            TelegramResponse::NoSuchTelegram
        );
        assert_eq!(
            telegram_response("<h1>teapot</h1>"),
            TelegramResponse::UnknownError
        );
    }
}
