//! Core domain model for pulsefeed: feed cards, normalized posts, keyword
//! specs, and filtering counters shared by every pipeline stage.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "pulse-core";

/// Keyword id carried by the combined/global search source. Posts harvested
/// from it skip the per-keyword token gate.
pub const GLOBAL_KEYWORD_ID: &str = "global";

/// Detected post language. The tagger only distinguishes the two languages
/// the harvested feeds actually mix; ties resolve to English.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Language {
    #[default]
    #[serde(rename = "EN")]
    En,
    #[serde(rename = "ES")]
    Es,
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Language::En => "EN",
            Language::Es => "ES",
        })
    }
}

/// Non-fatal filtering outcomes. These are expected dispositions, tallied
/// for observability, never surfaced as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DiscardReason {
    #[error("activity")]
    Activity,
    #[error("repost")]
    Repost,
    #[error("no_keyword")]
    NoKeyword,
    #[error("short_snippet")]
    ShortSnippet,
    #[error("no_url")]
    NoUrl,
}

/// One rendered feed item as the navigation collaborator saw it: the full
/// visible text plus the typed regions the classifier and extractor consume.
///
/// The canonical page fetched during verification is represented by the same
/// shape, with page-level regions in place of card-level ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Full visible text of the card.
    pub text: String,
    /// Structured activity identifier attribute, when the card carries one.
    pub urn: Option<String>,
    /// Structured identifier found on a descendant region.
    pub descendant_urn: Option<String>,
    /// Designated header/sub-region text (where reshare banners live).
    pub header_text: Option<String>,
    /// Whether a nested post structure is embedded in the card.
    pub has_embedded_post: bool,
    /// Distinct actor-name region texts, in document order.
    pub actor_names: Vec<String>,
    /// Outbound links that point at posts, normalized-deduped, in order.
    pub post_links: Vec<String>,
    /// Outbound links that point at member or organization profiles.
    pub profile_links: Vec<String>,
    /// Candidate author regions, in fallback priority order.
    pub author_regions: Vec<String>,
    /// Candidate snippet regions, in fallback priority order.
    pub snippet_regions: Vec<String>,
    /// Text of the dedicated reaction-count region, when present.
    pub reaction_count_text: Option<String>,
    /// Text of the combined social-counts region, when present.
    pub social_counts_text: Option<String>,
}

/// Canonical normalized post record. Immutable once appended to history;
/// corrections only happen before the history merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub url: String,
    pub author: String,
    pub snippet: String,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub reposts: u64,
    #[serde(default)]
    pub total: u64,
    pub keyword: String,
    #[serde(rename = "keywordId")]
    pub keyword_id: String,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub verified: bool,
    /// Stamped when the post enters history, not at extraction time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

impl Post {
    /// Ranking score: likes + comments. Reposts are excluded from ranking
    /// by design even though they count toward `total`.
    pub fn score(&self) -> u64 {
        self.likes + self.comments
    }

    /// Re-derive `total` from the three metric fields. Must be called after
    /// any metric changes.
    pub fn recompute_total(&mut self) {
        self.total = self.likes + self.comments + self.reposts;
    }
}

/// Strip the query string, keeping scheme+host+path. Idempotent; the key
/// for every dedup set.
pub fn normalize_url(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => base.to_string(),
        None => url.to_string(),
    }
}

/// One tracked topic: search terms drive the harvest, tokens gate whether a
/// harvested card actually mentions the topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordSpec {
    pub id: String,
    pub label: String,
    pub search_terms: Vec<String>,
    pub tokens: Vec<String>,
}

impl KeywordSpec {
    /// Case-insensitive substring match of any known token variant.
    pub fn matches(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.tokens
            .iter()
            .any(|token| lower.contains(&token.to_lowercase()))
    }
}

/// `{id, label}` pair embedded in the daily snapshot for the display layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordLabel {
    pub id: String,
    pub label: String,
}

/// The tracked keyword registry, loaded from `keywords.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordSet {
    pub keywords: Vec<KeywordSpec>,
}

impl KeywordSet {
    pub fn get(&self, id: &str) -> Option<&KeywordSpec> {
        self.keywords.iter().find(|k| k.id == id)
    }

    pub fn labels(&self) -> Vec<KeywordLabel> {
        self.keywords
            .iter()
            .map(|k| KeywordLabel {
                id: k.id.clone(),
                label: k.label.clone(),
            })
            .collect()
    }

    /// Keep only the listed keyword ids (quick-run mode).
    pub fn retain_ids(&mut self, ids: &[String]) {
        self.keywords.retain(|k| ids.iter().any(|id| id == &k.id));
    }
}

/// Per-source and run-global filtering tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub cards: usize,
    pub activity: usize,
    pub repost: usize,
    pub no_keyword: usize,
    pub short_snippet: usize,
    pub no_url: usize,
    pub duplicate: usize,
    pub accepted: usize,
    pub verify_rejected: usize,
}

impl FilterStats {
    pub fn record_discard(&mut self, reason: DiscardReason) {
        match reason {
            DiscardReason::Activity => self.activity += 1,
            DiscardReason::Repost => self.repost += 1,
            DiscardReason::NoKeyword => self.no_keyword += 1,
            DiscardReason::ShortSnippet => self.short_snippet += 1,
            DiscardReason::NoUrl => self.no_url += 1,
        }
    }

    pub fn absorb(&mut self, other: &FilterStats) {
        self.cards += other.cards;
        self.activity += other.activity;
        self.repost += other.repost;
        self.no_keyword += other.no_keyword;
        self.short_snippet += other.short_snippet;
        self.no_url += other.no_url;
        self.duplicate += other.duplicate;
        self.accepted += other.accepted;
        self.verify_rejected += other.verify_rejected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_post(url: &str, likes: u64, comments: u64, reposts: u64) -> Post {
        let mut post = Post {
            url: url.to_string(),
            author: "Someone".to_string(),
            snippet: "snippet".to_string(),
            likes,
            comments,
            reposts,
            total: 0,
            keyword: "#esg".to_string(),
            keyword_id: "esg".to_string(),
            language: Language::En,
            verified: false,
            date: None,
        };
        post.recompute_total();
        post
    }

    #[test]
    fn total_is_sum_of_metrics_and_score_excludes_reposts() {
        let post = mk_post("https://example.com/posts/1", 10, 4, 7);
        assert_eq!(post.total, 21);
        assert_eq!(post.score(), 14);
    }

    #[test]
    fn normalize_url_strips_query_string_and_is_idempotent() {
        let tracked = "https://x/post/123?track=abc&utm=1";
        let bare = "https://x/post/123";
        assert_eq!(normalize_url(tracked), bare);
        assert_eq!(normalize_url(bare), bare);
        assert_eq!(normalize_url(&normalize_url(tracked)), normalize_url(tracked));
    }

    #[test]
    fn keyword_token_match_is_case_insensitive_substring() {
        let spec = KeywordSpec {
            id: "esg".to_string(),
            label: "ESG".to_string(),
            search_terms: vec!["#esg".to_string()],
            tokens: vec!["#esg".to_string(), "esg reporting".to_string()],
        };
        assert!(spec.matches("Our ESG Reporting journey continues"));
        assert!(spec.matches("launch day! #ESG"));
        assert!(!spec.matches("nothing relevant here"));
    }

    #[test]
    fn language_serializes_as_uppercase_code() {
        let json = serde_json::to_string(&Language::Es).unwrap();
        assert_eq!(json, "\"ES\"");
        let back: Language = serde_json::from_str("\"EN\"").unwrap();
        assert_eq!(back, Language::En);
    }

    #[test]
    fn filter_stats_tallies_each_reason() {
        let mut stats = FilterStats::default();
        stats.record_discard(DiscardReason::Activity);
        stats.record_discard(DiscardReason::Repost);
        stats.record_discard(DiscardReason::Repost);
        stats.record_discard(DiscardReason::NoUrl);
        assert_eq!(stats.activity, 1);
        assert_eq!(stats.repost, 2);
        assert_eq!(stats.no_url, 1);

        let mut global = FilterStats::default();
        global.absorb(&stats);
        global.absorb(&stats);
        assert_eq!(global.repost, 4);
    }
}
