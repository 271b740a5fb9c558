//! Run orchestration: keyword registry, navigator seam, per-source harvest
//! loop, verification pass, ranking, and the end-of-run document writes.
//!
//! The whole run is strictly sequential — the navigation collaborator owns a
//! single viewport and a shared rate budget — and nothing is persisted until
//! every source either completed or degraded cleanly.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::{
    normalize_url, Card, DiscardReason, FilterStats, KeywordSet, Post, GLOBAL_KEYWORD_ID,
};
use pulse_extract::{
    classify, clean_snippet, detect_language, extract_author, extract_comments, extract_likes,
    extract_post, extract_reposts, parse_feed_html, parse_post_page, repost_signal, Disposition,
    KeywordHint,
};
use pulse_storage::{leaderboard, merge_history, DailySnapshot, DebugStore, DocumentStore};
use serde::Serialize;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "pulse-pipeline";

/// Display label carried by posts harvested from the combined search.
pub const GLOBAL_KEYWORD_LABEL: &str = "#esg+climatetech+sustainability";
/// Search term of the combined/global source.
pub const GLOBAL_SEARCH_TERM: &str = "esg climatetech sustainability";

const SEARCH_URL_BASE: &str = "https://www.linkedin.com/search/results/content/";

// ───────────────────────────────────────────────────────────────────────────
// Configuration
// ───────────────────────────────────────────────────────────────────────────

/// Randomized pacing bounds. Scheduling policy only — every bound may be
/// zero, and tests run with `DelayPolicy::zero()`.
#[derive(Debug, Clone, Copy)]
pub struct DelayPolicy {
    pub search_min: Duration,
    pub search_max: Duration,
    pub verify_min: Duration,
    pub verify_max: Duration,
    /// Every this many searches, take the long pause instead. 0 disables.
    pub long_pause_every: usize,
    pub long_pause_min: Duration,
    pub long_pause_max: Duration,
}

impl DelayPolicy {
    pub fn from_env() -> Self {
        Self {
            search_min: Duration::from_millis(env_u64("PULSE_SEARCH_DELAY_MS_MIN", 8_000)),
            search_max: Duration::from_millis(env_u64("PULSE_SEARCH_DELAY_MS_MAX", 15_000)),
            verify_min: Duration::from_millis(env_u64("PULSE_VERIFY_DELAY_MS_MIN", 2_000)),
            verify_max: Duration::from_millis(env_u64("PULSE_VERIFY_DELAY_MS_MAX", 4_000)),
            long_pause_every: env_usize("PULSE_LONG_PAUSE_EVERY", 5),
            long_pause_min: Duration::from_millis(env_u64("PULSE_LONG_PAUSE_MS_MIN", 30_000)),
            long_pause_max: Duration::from_millis(env_u64("PULSE_LONG_PAUSE_MS_MAX", 60_000)),
        }
    }

    pub fn zero() -> Self {
        Self {
            search_min: Duration::ZERO,
            search_max: Duration::ZERO,
            verify_min: Duration::ZERO,
            verify_max: Duration::ZERO,
            long_pause_every: 0,
            long_pause_min: Duration::ZERO,
            long_pause_max: Duration::ZERO,
        }
    }

    fn jittered(min: Duration, max: Duration) -> Duration {
        if max <= min {
            return min;
        }
        let span = (max - min).as_millis() as u64;
        min + Duration::from_millis(fastrand::u64(0..=span))
    }

    /// Pause after the search at `index`; every `long_pause_every` searches
    /// the long bounds apply instead of the regular ones.
    pub async fn pause_between_searches(&self, index: usize) {
        let delay = if self.long_pause_every > 0 && (index + 1) % self.long_pause_every == 0 {
            Self::jittered(self.long_pause_min, self.long_pause_max)
        } else {
            Self::jittered(self.search_min, self.search_max)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    pub async fn pause_before_verification(&self) {
        let delay = Self::jittered(self.verify_min, self.verify_max);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Where the three JSON documents live.
    pub data_dir: PathBuf,
    /// Where diagnostic page dumps go.
    pub debug_dir: PathBuf,
    /// Keyword registry file.
    pub keywords_path: PathBuf,
    /// Persisted browser session file; when set, it must exist before a run
    /// starts (missing session is the unrecoverable-setup exit).
    pub session_state: Option<PathBuf>,
    /// Canonical-page verification pass. Off keeps first-pass fields and
    /// leaves `verified` false for every post.
    pub verify_posts: bool,
    pub top_n: usize,
    pub leaderboard_n: usize,
    pub cards_per_source: usize,
    /// Quick mode restricts the registry to `quick_keyword_ids`.
    pub quick: bool,
    pub quick_keyword_ids: Vec<String>,
    pub delays: DelayPolicy,
    pub scheduler_enabled: bool,
    pub fetch_cron: String,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: env_path("PULSE_DATA_DIR", "public"),
            debug_dir: env_path("PULSE_DEBUG_DIR", "debug"),
            keywords_path: env_path("PULSE_KEYWORDS", "keywords.yaml"),
            session_state: std::env::var("PULSE_SESSION_STATE").ok().map(PathBuf::from),
            verify_posts: env_flag("PULSE_VERIFY", true),
            top_n: env_usize("PULSE_TOP_N", 3),
            leaderboard_n: env_usize("PULSE_LEADERBOARD_N", 10),
            cards_per_source: env_usize("PULSE_CARDS_PER_SOURCE", 40),
            quick: env_flag("PULSE_QUICK", false),
            quick_keyword_ids: std::env::var("PULSE_QUICK_KEYWORDS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|_| {
                    vec![
                        "esg".to_string(),
                        "sustainability".to_string(),
                        "climatetech".to_string(),
                    ]
                }),
            delays: DelayPolicy::from_env(),
            scheduler_enabled: env_flag("PULSE_SCHEDULER_ENABLED", false),
            fetch_cron: std::env::var("PULSE_FETCH_CRON")
                .unwrap_or_else(|_| "0 6 * * *".to_string()),
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var(name)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

pub fn load_keywords(path: &Path) -> Result<KeywordSet> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Fails when a configured session state file is absent; the caller maps
/// this to the unrecoverable-setup exit code.
pub fn ensure_session_state(config: &PipelineConfig) -> Result<()> {
    if let Some(path) = &config.session_state {
        if !path.exists() {
            bail!(
                "session state {} not found; run the login flow first",
                path.display()
            );
        }
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────────────────
// Search sources
// ───────────────────────────────────────────────────────────────────────────

/// One keyword search to drive through the navigator, in priority order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchSource {
    pub keyword_id: String,
    pub term: String,
    pub url: String,
}

fn search_url(term: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(term.as_bytes()).collect();
    format!("{SEARCH_URL_BASE}?keywords={encoded}&datePosted=%22past-24h%22")
}

/// Expand the registry into sources: one per (keyword, search term) pair,
/// then the combined/global source last.
pub fn build_search_sources(keywords: &KeywordSet) -> Vec<SearchSource> {
    let mut sources = Vec::new();
    for spec in &keywords.keywords {
        for term in &spec.search_terms {
            sources.push(SearchSource {
                keyword_id: spec.id.clone(),
                term: term.clone(),
                url: search_url(term),
            });
        }
    }
    sources.push(SearchSource {
        keyword_id: GLOBAL_KEYWORD_ID.to_string(),
        term: GLOBAL_SEARCH_TERM.to_string(),
        url: search_url(GLOBAL_SEARCH_TERM),
    });
    sources
}

fn keyword_hint_for<'a>(
    source: &'a SearchSource,
    keywords: &'a KeywordSet,
) -> KeywordHint<'a> {
    if source.keyword_id == GLOBAL_KEYWORD_ID {
        KeywordHint {
            id: GLOBAL_KEYWORD_ID,
            label: GLOBAL_KEYWORD_LABEL,
            spec: None,
        }
    } else {
        KeywordHint {
            id: &source.keyword_id,
            label: &source.term,
            spec: keywords.get(&source.keyword_id),
        }
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Navigator seam
// ───────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum NavError {
    #[error("navigation failed: {0}")]
    Failed(String),
}

/// Result of rendering one search source.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub cards: Vec<Card>,
    /// Login/checkpoint detected; aborts the run without writes.
    pub blocked: bool,
    /// Raw page HTML for diagnostic dumps, when the collaborator exposes it.
    pub raw_html: Option<String>,
}

/// Result of rendering one canonical post page.
#[derive(Debug, Clone, Default)]
pub struct PageOutcome {
    pub page: Option<Card>,
    pub blocked: bool,
}

/// The external navigation collaborator: renders pages and yields cards.
/// Session/checkpoint detection lives behind this seam; the pipeline only
/// honors the `blocked` flag.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn search(&self, source: &SearchSource) -> Result<SearchOutcome, NavError>;
    async fn fetch_post(&self, url: &str) -> Result<PageOutcome, NavError>;
}

/// Replays saved feed pages from a directory, keyed by slugified search
/// term (`<slug>.html`, post pages under `posts/<slug>.html`). Used for
/// offline runs and the test suite.
#[derive(Debug, Clone)]
pub struct FixtureNavigator {
    root: PathBuf,
}

impl FixtureNavigator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Navigator for FixtureNavigator {
    async fn search(&self, source: &SearchSource) -> Result<SearchOutcome, NavError> {
        let path = self
            .root
            .join(format!("{}.html", DebugStore::slugify(&source.term)));
        let html = match tokio::fs::read_to_string(&path).await {
            Ok(html) => html,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SearchOutcome::default());
            }
            Err(err) => return Err(NavError::Failed(err.to_string())),
        };
        let cards = parse_feed_html(&html).map_err(|e| NavError::Failed(e.to_string()))?;
        Ok(SearchOutcome {
            cards,
            blocked: false,
            raw_html: Some(html),
        })
    }

    async fn fetch_post(&self, url: &str) -> Result<PageOutcome, NavError> {
        let path = self
            .root
            .join("posts")
            .join(format!("{}.html", DebugStore::slugify(url)));
        let html = match tokio::fs::read_to_string(&path).await {
            Ok(html) => html,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PageOutcome::default());
            }
            Err(err) => return Err(NavError::Failed(err.to_string())),
        };
        let page = parse_post_page(&html).map_err(|e| NavError::Failed(e.to_string()))?;
        Ok(PageOutcome {
            page: Some(page),
            blocked: false,
        })
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Run state and results
// ───────────────────────────────────────────────────────────────────────────

/// Batch state threaded through the stages of one run; owned by the
/// pipeline, never shared across runs.
#[derive(Debug, Default)]
struct RunContext {
    seen: HashSet<String>,
    stats: FilterStats,
    posts: Vec<Post>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: usize,
    pub stats: FilterStats,
    pub collected: usize,
    pub selected: usize,
    pub history_len: usize,
    pub history_added: usize,
}

/// How a run ended. `Blocked` means the session guard tripped: nothing was
/// written and the process must exit with the distinguished code.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunSummary),
    Blocked,
}

enum VerifyOutcome {
    Done,
    Blocked,
}

// ───────────────────────────────────────────────────────────────────────────
// Pipeline
// ───────────────────────────────────────────────────────────────────────────

pub struct Pipeline {
    config: PipelineConfig,
    keywords: KeywordSet,
    documents: DocumentStore,
    debug: DebugStore,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let mut keywords = load_keywords(&config.keywords_path)?;
        if config.quick {
            keywords.retain_ids(&config.quick_keyword_ids);
        }
        Ok(Self::with_keywords(config, keywords))
    }

    /// Bypass the registry file; used by tests and embedders.
    pub fn with_keywords(config: PipelineConfig, keywords: KeywordSet) -> Self {
        let documents = DocumentStore::new(config.data_dir.clone());
        let debug = DebugStore::new(config.debug_dir.clone());
        Self {
            config,
            keywords,
            documents,
            debug,
        }
    }

    pub fn keywords(&self) -> &KeywordSet {
        &self.keywords
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    /// One full harvest run. History is read once up front; the three JSON
    /// documents are written only after every stage completed un-blocked.
    pub async fn run_once(&self, navigator: &dyn Navigator) -> Result<RunOutcome> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let mut history = self.documents.load_history().await?;
        let sources = build_search_sources(&self.keywords);
        let mut ctx = RunContext::default();

        info!(
            %run_id,
            keywords = self.keywords.keywords.len(),
            sources = sources.len(),
            history = history.len(),
            verify = self.config.verify_posts,
            "starting harvest run"
        );

        for (index, source) in sources.iter().enumerate() {
            let outcome = match navigator.search(source).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(term = %source.term, error = %err, "source navigation failed, skipping");
                    continue;
                }
            };

            if outcome.blocked {
                warn!(term = %source.term, "session checkpoint detected, aborting run");
                self.dump_page(&source.term, outcome.raw_html.as_deref()).await;
                return Ok(RunOutcome::Blocked);
            }

            let source_stats = self.harvest_source(source, &outcome.cards, &mut ctx);
            info!(
                term = %source.term,
                cards = source_stats.cards,
                accepted = source_stats.accepted,
                activity = source_stats.activity,
                repost = source_stats.repost,
                no_keyword = source_stats.no_keyword,
                short_snippet = source_stats.short_snippet,
                no_url = source_stats.no_url,
                duplicate = source_stats.duplicate,
                "source filtered"
            );

            if source_stats.cards == 0 || source_stats.accepted == 0 {
                self.dump_page(&source.term, outcome.raw_html.as_deref()).await;
            }
            ctx.stats.absorb(&source_stats);

            if index + 1 < sources.len() {
                self.config.delays.pause_between_searches(index).await;
            }
        }

        if self.config.verify_posts {
            if let VerifyOutcome::Blocked = self.verify_candidates(navigator, &mut ctx).await {
                warn!("session checkpoint detected during verification, aborting run");
                return Ok(RunOutcome::Blocked);
            }
        }

        let today = Utc::now().date_naive();
        let selection = select_top_n(&ctx.posts, self.config.top_n);
        let snapshot = DailySnapshot {
            last_updated: Utc::now(),
            date: today,
            keywords: self.keywords.labels(),
            posts: selection.clone(),
            all_posts: ctx.posts.clone(),
        };
        self.documents.save_snapshot(&snapshot).await?;

        let history_added = merge_history(&mut history, &selection, today);
        self.documents.save_history(&history).await?;

        let board = leaderboard(&history, self.config.leaderboard_n);
        self.documents.save_leaderboard(&board).await?;

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            sources: sources.len(),
            stats: ctx.stats,
            collected: ctx.posts.len(),
            selected: selection.len(),
            history_len: history.len(),
            history_added,
        };
        info!(
            %run_id,
            cards = summary.stats.cards,
            activity = summary.stats.activity,
            repost = summary.stats.repost,
            no_keyword = summary.stats.no_keyword,
            short_snippet = summary.stats.short_snippet,
            no_url = summary.stats.no_url,
            duplicate = summary.stats.duplicate,
            verify_rejected = summary.stats.verify_rejected,
            collected = summary.collected,
            selected = summary.selected,
            history = summary.history_len,
            added = summary.history_added,
            "run complete"
        );
        Ok(RunOutcome::Completed(summary))
    }

    fn harvest_source(
        &self,
        source: &SearchSource,
        cards: &[Card],
        ctx: &mut RunContext,
    ) -> FilterStats {
        let mut stats = FilterStats::default();
        let hint = keyword_hint_for(source, &self.keywords);

        for card in cards.iter().take(self.config.cards_per_source) {
            stats.cards += 1;
            match classify(card) {
                Disposition::Activity => stats.record_discard(DiscardReason::Activity),
                Disposition::Repost => stats.record_discard(DiscardReason::Repost),
                Disposition::OriginalCandidate => match extract_post(card, &hint) {
                    Ok(post) => {
                        if ctx.seen.insert(normalize_url(&post.url)) {
                            stats.accepted += 1;
                            ctx.posts.push(post);
                        } else {
                            stats.duplicate += 1;
                        }
                    }
                    Err(reason) => stats.record_discard(reason),
                },
            }
        }
        stats
    }

    /// Second-pass verification against each candidate's canonical page.
    /// Any repost signal on the page is a hard rejection; a page that fails
    /// to load keeps the first-pass fields.
    async fn verify_candidates(
        &self,
        navigator: &dyn Navigator,
        ctx: &mut RunContext,
    ) -> VerifyOutcome {
        let candidates = std::mem::take(&mut ctx.posts);
        let mut kept = Vec::with_capacity(candidates.len());

        for mut post in candidates {
            self.config.delays.pause_before_verification().await;

            let outcome = match navigator.fetch_post(&post.url).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(url = %post.url, error = %err, "verification fetch failed, keeping first-pass fields");
                    kept.push(post);
                    continue;
                }
            };
            if outcome.blocked {
                return VerifyOutcome::Blocked;
            }
            let Some(page) = outcome.page else {
                kept.push(post);
                continue;
            };

            if let Some(signal) = repost_signal(&page) {
                ctx.stats.verify_rejected += 1;
                info!(url = %post.url, signal, "verification rejected candidate");
                continue;
            }

            if let Some(author) = extract_author(&page) {
                post.author = author;
            }
            // Only a dedicated snippet region may override; the page body as
            // a whole is full of navigation chrome.
            if let Some(snippet) = page
                .snippet_regions
                .iter()
                .find(|region| region.trim().chars().count() > 20)
                .map(|region| clean_snippet(region))
            {
                post.snippet = snippet;
                post.language = detect_language(&post.snippet);
            }
            let likes = extract_likes(&page);
            if likes > 0 {
                post.likes = likes;
            }
            let comments = extract_comments(&page);
            if comments > 0 {
                post.comments = comments;
            }
            let reposts = extract_reposts(&page);
            if reposts > 0 {
                post.reposts = reposts;
            }
            post.recompute_total();
            post.verified = true;
            kept.push(post);
        }

        ctx.posts = kept;
        VerifyOutcome::Done
    }

    async fn dump_page(&self, source_term: &str, raw_html: Option<&str>) {
        let Some(html) = raw_html else { return };
        if let Err(err) = self.debug.store_page(Utc::now(), source_term, html).await {
            warn!(term = source_term, error = %err, "failed to store debug page dump");
        }
    }

    /// Optional in-process scheduler; most deployments drive runs from
    /// external cron instead.
    pub async fn maybe_build_scheduler(&self) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.fetch_cron.clone();
        let job = Job::new_async(cron.as_str(), |_uuid, _l| {
            Box::pin(async move {
                warn!("scheduled fetch tick; wire a navigator and call run_once");
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }
}

/// Today's top-N selection.
///
/// Priority: enough scored candidates → top N by score (stable on ties);
/// some scored → all of them plus zero-score fill by snippet length; none
/// scored → snippet length only; nothing at all → empty, which is valid.
pub fn select_top_n(posts: &[Post], n: usize) -> Vec<Post> {
    let mut selection: Vec<Post> = posts.iter().filter(|p| p.score() > 0).cloned().collect();
    selection.sort_by(|a, b| b.score().cmp(&a.score()));
    if selection.len() >= n {
        selection.truncate(n);
        return selection;
    }

    let mut fill: Vec<Post> = posts.iter().filter(|p| p.score() == 0).cloned().collect();
    fill.sort_by(|a, b| b.snippet.chars().count().cmp(&a.snippet.chars().count()));
    for post in fill {
        if selection.len() == n {
            break;
        }
        selection.push(post);
    }
    selection
}
