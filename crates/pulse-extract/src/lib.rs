//! Pure analysis over feed cards: activity/repost classification, fallback
//! chain field extraction, language tagging, and feed-HTML parsing.
//!
//! Everything here is deterministic and I/O-free; the pipeline crate owns
//! navigation, pacing, and persistence.

use pulse_core::{Card, DiscardReason, KeywordSpec, Language, Post};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

pub const CRATE_NAME: &str = "pulse-extract";

/// Snippets shorter than this (after cleaning) discard the card.
pub const MIN_SNIPPET_LEN: usize = 40;
/// Snippets are whitespace-collapsed and bounded at this many chars.
pub const SNIPPET_MAX_LEN: usize = 240;
/// How much of the card text counts as the header region for reshare banners.
const HEADER_REGION_CHARS: usize = 500;

const LIKES_SANITY_CAP: u64 = 1_000_000;
const COMMENTS_SANITY_CAP: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid selector: {0}")]
    Selector(String),
}

// ───────────────────────────────────────────────────────────────────────────
// Classifier
// ───────────────────────────────────────────────────────────────────────────

/// Card disposition decided by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Activity,
    Repost,
    OriginalCandidate,
}

/// First/third-party interaction verbs. Any word-bounded match anywhere in
/// the card text marks the card as activity noise.
const ACTIVITY_PHRASES: &[&str] = &[
    "commented on",
    "replied to",
    "liked",
    "likes this",
    "reacted to",
    "celebrated",
    "recommended",
    "follows",
    "found this interesting",
    "supports this",
    "loves this",
    "funny",
    "comentó",
    "comentó en",
    "le gustó",
    "reaccionó",
    "celebró",
    "recomendó",
    "respondió",
    "respondio",
];

/// Reshare phrases checked against the header region of the card text.
const REPOST_HEADER_PHRASES: &[&str] = &[
    "reposted this",
    "reposted",
    "shared this",
    "shared a post",
    "compartió esto",
    "compartió una publicación",
    "ha compartido",
    "volvió a publicar",
];

/// Broader reshare phrases for the designated header sub-region attribute,
/// which carries only banner text and tolerates looser matching.
const REPOST_BANNER_PHRASES: &[&str] = &[
    "reposted",
    "shared",
    "compartió",
    "ha compartido",
    "volvió a publicar",
];

/// Attribution phrases anywhere in the card text.
const ATTRIBUTION_PHRASES: &[&str] = &[
    "via @",
    "shared from",
    "originally posted by",
    "de @",
];

/// First `n` chars of `text`, char-boundary safe.
fn char_prefix(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Containment of `needle` with word boundaries on both sides; callers
/// lower-case both sides. Every occurrence is checked, so a needle embedded
/// in a longer word does not mask a later bounded match.
fn contains_word(haystack: &str, needle: &str) -> bool {
    let mut from = 0;
    while let Some(rel) = haystack[from..].find(needle) {
        let at = from + rel;
        let bounded_before = haystack[..at]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let bounded_after = haystack[at + needle.len()..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if bounded_before && bounded_after {
            return true;
        }
        from = at + needle.len();
    }
    false
}

/// One independently testable repost predicate. Signals are OR'd: any single
/// match classifies the card as a repost, no quorum required.
pub struct RepostSignal {
    pub name: &'static str,
    check: fn(&Card) -> bool,
}

pub const REPOST_SIGNALS: &[RepostSignal] = &[
    RepostSignal {
        name: "header-phrase",
        check: |card| {
            let header = char_prefix(&card.text, HEADER_REGION_CHARS).to_lowercase();
            REPOST_HEADER_PHRASES
                .iter()
                .any(|phrase| contains_word(&header, phrase))
        },
    },
    RepostSignal {
        name: "banner-region",
        check: |card| match &card.header_text {
            Some(banner) => {
                let banner = banner.to_lowercase();
                REPOST_BANNER_PHRASES
                    .iter()
                    .any(|phrase| contains_word(&banner, phrase))
            }
            None => false,
        },
    },
    RepostSignal {
        name: "embedded-post",
        check: |card| card.has_embedded_post,
    },
    RepostSignal {
        name: "multiple-actors",
        check: |card| card.actor_names.len() > 1,
    },
    RepostSignal {
        name: "multiple-post-links",
        check: |card| card.post_links.len() > 1,
    },
    RepostSignal {
        name: "attribution-phrase",
        check: |card| {
            let text = card.text.to_lowercase();
            ATTRIBUTION_PHRASES
                .iter()
                .any(|phrase| text.contains(phrase))
        },
    },
];

/// Activity check over the full card text. Evaluated before any repost
/// signal; a match short-circuits the rest of the classifier.
pub fn is_activity(text: &str) -> bool {
    let lower = text.to_lowercase();
    ACTIVITY_PHRASES
        .iter()
        .any(|phrase| contains_word(&lower, phrase))
}

/// Name of the first repost signal that fires, if any. Also used by the
/// verifier against the canonical page's card.
pub fn repost_signal(card: &Card) -> Option<&'static str> {
    REPOST_SIGNALS
        .iter()
        .find(|signal| (signal.check)(card))
        .map(|signal| signal.name)
}

pub fn classify(card: &Card) -> Disposition {
    if is_activity(&card.text) {
        return Disposition::Activity;
    }
    if repost_signal(card).is_some() {
        return Disposition::Repost;
    }
    Disposition::OriginalCandidate
}

// ───────────────────────────────────────────────────────────────────────────
// Field extraction
// ───────────────────────────────────────────────────────────────────────────

const ACTIVITY_URN_MARKER: &str = "urn:li:activity:";
const POST_LINK_MARKERS: &[&str] = &["/feed/update/", "/posts/", "urn:li:activity"];
const PROFILE_LINK_MARKERS: &[&str] = &["/in/", "/company/"];
const SITE_ORIGIN: &str = "https://www.linkedin.com";

pub fn is_post_link(href: &str) -> bool {
    POST_LINK_MARKERS.iter().any(|marker| href.contains(marker))
}

pub fn is_profile_link(href: &str) -> bool {
    PROFILE_LINK_MARKERS.iter().any(|marker| href.contains(marker))
}

fn url_from_card_urn(card: &Card) -> Option<String> {
    let urn = card.urn.as_deref()?;
    if !urn.contains(ACTIVITY_URN_MARKER) {
        return None;
    }
    Some(format!("{SITE_ORIGIN}/feed/update/{urn}/"))
}

fn url_from_post_links(card: &Card) -> Option<String> {
    let href = card.post_links.first()?;
    if href.starts_with("http") {
        Some(href.clone())
    } else {
        Some(format!("{SITE_ORIGIN}{href}"))
    }
}

fn url_from_descendant_urn(card: &Card) -> Option<String> {
    let urn = card.descendant_urn.as_deref()?;
    Some(format!("{SITE_ORIGIN}/feed/update/{urn}/"))
}

fn url_from_text_pattern(card: &Card) -> Option<String> {
    let start = card.text.find(ACTIVITY_URN_MARKER)?;
    let digits: String = card.text[start + ACTIVITY_URN_MARKER.len()..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    Some(format!("{SITE_ORIGIN}/feed/update/{ACTIVITY_URN_MARKER}{digits}/"))
}

/// Ordered URL extraction strategies; the first non-empty result wins.
pub const URL_STRATEGIES: &[(&str, fn(&Card) -> Option<String>)] = &[
    ("card-urn", url_from_card_urn),
    ("post-link", url_from_post_links),
    ("descendant-urn", url_from_descendant_urn),
    ("text-urn", url_from_text_pattern),
];

pub fn extract_url(card: &Card) -> Option<String> {
    URL_STRATEGIES
        .iter()
        .find_map(|(_, strategy)| strategy(card))
}

/// First author region with a usable name; only the first line is kept.
pub fn extract_author(card: &Card) -> Option<String> {
    card.author_regions.iter().find_map(|region| {
        let first_line = region.lines().next().unwrap_or("").trim();
        if first_line.chars().count() > 1 {
            Some(first_line.to_string())
        } else {
            None
        }
    })
}

/// First snippet region with enough text, falling back to the card text.
pub fn extract_snippet(card: &Card) -> String {
    let from_region = card.snippet_regions.iter().find_map(|region| {
        if region.trim().chars().count() > 20 {
            Some(clean_snippet(region))
        } else {
            None
        }
    });
    from_region.unwrap_or_else(|| clean_snippet(&card.text))
}

/// Collapse whitespace and bound the snippet length.
pub fn clean_snippet(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SNIPPET_MAX_LEN {
        return collapsed;
    }
    let truncated: String = collapsed.chars().take(SNIPPET_MAX_LEN).collect();
    format!("{}...", truncated.trim_end())
}

/// Parse a human-formatted metric count ("1,234", "1.2K", "3M"). Anything
/// unparseable yields 0; metric absence is never an error.
pub fn parse_metric_count(text: &str) -> u64 {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | 'k' | 'K' | 'm' | 'M'))
        .collect();
    let cleaned = cleaned.replace(',', ".");
    if cleaned.is_empty() {
        return 0;
    }

    let (number, suffix) = match cleaned.chars().last() {
        Some(c @ ('k' | 'K' | 'm' | 'M')) => {
            (&cleaned[..cleaned.len() - 1], Some(c.to_ascii_lowercase()))
        }
        _ => (cleaned.as_str(), None),
    };

    let well_formed = !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit() || c == '.')
        && number.matches('.').count() <= 1
        && number.starts_with(|c: char| c.is_ascii_digit());

    if !well_formed {
        let leading: String = cleaned.chars().take_while(|c| c.is_ascii_digit()).collect();
        return leading.parse().unwrap_or(0);
    }

    let value: f64 = match number.parse() {
        Ok(v) => v,
        Err(_) => return 0,
    };
    let scaled = match suffix {
        Some('k') => value * 1_000.0,
        Some('m') => value * 1_000_000.0,
        _ => value,
    };
    scaled.round() as u64
}

/// Find a metric count written immediately before one of the needles, e.g.
/// "12 comments" or "1.2K compartidos".
pub fn metric_before(text: &str, needles: &[&str]) -> u64 {
    let lower = text.to_lowercase();
    for needle in needles {
        let mut search_from = 0;
        while let Some(rel) = lower[search_from..].find(needle) {
            let at = search_from + rel;
            let prefix = &lower[..at];
            let span: String = prefix
                .chars()
                .rev()
                .skip_while(|c| c.is_whitespace())
                .take_while(|c| {
                    c.is_ascii_digit() || matches!(c, '.' | ',' | 'k' | 'm')
                })
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            let value = parse_metric_count(&span);
            if value > 0 {
                return value;
            }
            search_from = at + needle.len();
        }
    }
    0
}

/// Likes: the dedicated reaction-count region, else the leading number of
/// the combined counts region. Values outside the sanity cap are dropped.
pub fn extract_likes(card: &Card) -> u64 {
    if let Some(text) = &card.reaction_count_text {
        let count = parse_metric_count(text);
        if count > 0 && count < LIKES_SANITY_CAP {
            return count;
        }
    }
    if let Some(text) = &card.social_counts_text {
        let leading: String = text
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if let Ok(count) = leading.parse::<u64>() {
            if count > 0 && count < LIKES_SANITY_CAP {
                return count;
            }
        }
    }
    0
}

pub fn extract_comments(card: &Card) -> u64 {
    let Some(text) = &card.social_counts_text else {
        return 0;
    };
    let count = metric_before(text, &["comment", "comentario"]);
    if count < COMMENTS_SANITY_CAP {
        count
    } else {
        0
    }
}

/// Repost counts only appear reliably on the canonical page; the verifier
/// calls this against the page card.
pub fn extract_reposts(card: &Card) -> u64 {
    let Some(text) = &card.social_counts_text else {
        return 0;
    };
    metric_before(text, &["repost", "compartido"])
}

fn fold_accents(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        other => other,
    }
}

/// Heuristic for reposts that slipped past the structural signals: an
/// organization profile linked prominently (within the first 4 profile
/// links) whose slug shares no token with the author name.
pub fn is_probable_repost(author: &str, profile_links: &[String]) -> bool {
    if author.is_empty() || profile_links.is_empty() {
        return false;
    }

    let normalized: String = author
        .to_lowercase()
        .chars()
        .map(fold_accents)
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    let author_parts: Vec<&str> = normalized
        .split_whitespace()
        .filter(|part| part.chars().count() > 2)
        .collect();

    for (index, link) in profile_links.iter().enumerate() {
        if !link.contains("/company/") || link.contains("/posts") {
            continue;
        }
        let Some(slug) = link
            .split("/company/")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
        else {
            continue;
        };
        let slug = slug.to_lowercase().replace('-', "");
        let related = author_parts.iter().any(|part| slug.contains(part));
        if !related {
            // The author's own profile normally comes first; an unrelated
            // organization this early means the content is theirs.
            return index < 4;
        }
    }

    false
}

/// Keyword context for one search source. `spec` is `None` for the
/// combined/global source, which skips the token gate.
pub struct KeywordHint<'a> {
    pub id: &'a str,
    pub label: &'a str,
    pub spec: Option<&'a KeywordSpec>,
}

/// Full card extraction. Runs only on `OriginalCandidate` cards; every
/// discard here is an expected, tallied outcome.
pub fn extract_post(card: &Card, hint: &KeywordHint<'_>) -> Result<Post, DiscardReason> {
    let url = extract_url(card).ok_or(DiscardReason::NoUrl)?;

    let author = extract_author(card).unwrap_or_default();
    if !author.is_empty() && is_probable_repost(&author, &card.profile_links) {
        return Err(DiscardReason::Repost);
    }

    let snippet = extract_snippet(card);
    if snippet.chars().count() < MIN_SNIPPET_LEN {
        return Err(DiscardReason::ShortSnippet);
    }

    if let Some(spec) = hint.spec {
        let combined = format!("{snippet} {}", card.text);
        if !spec.matches(&combined) {
            return Err(DiscardReason::NoKeyword);
        }
    }

    let mut post = Post {
        url,
        author,
        snippet: snippet.clone(),
        likes: extract_likes(card),
        comments: extract_comments(card),
        // Repost counts come from the canonical page during verification.
        reposts: 0,
        total: 0,
        keyword: hint.label.to_string(),
        keyword_id: hint.id.to_string(),
        language: detect_language(&snippet),
        verified: false,
        date: None,
    };
    post.recompute_total();
    Ok(post)
}

// ───────────────────────────────────────────────────────────────────────────
// Language tagger
// ───────────────────────────────────────────────────────────────────────────

const SPANISH_WORDS: &[&str] = &[
    " el ", " la ", " los ", " las ", " de ", " del ", " que ", " en ", " es ",
    " un ", " una ", " para ", " con ", " por ", " su ", " sus ", " al ",
    " se ", " como ", " más ", " pero ", " este ", " esta ", " estos ",
    " estas ", " sobre ", " entre ", " también ", " sido ", " hace ",
    " hacia ", " desde ", " durante ", " mediante ", " según ", " aunque ",
    " puede ", " pueden ", " debe ", " deben ", " tiene ", " tienen ",
    " está ", " están ", " será ", " serán ", " siendo ", " hemos ",
    " nuestra ", " nuestro ", " empresa ", " empresas ",
];

const ENGLISH_WORDS: &[&str] = &[
    " the ", " is ", " are ", " was ", " were ", " be ", " been ", " being ",
    " have ", " has ", " had ", " do ", " does ", " did ", " will ",
    " would ", " could ", " should ", " may ", " might ", " must ",
    " shall ", " for ", " and ", " with ", " that ", " this ", " from ",
    " they ", " we ", " our ", " your ", " their ", " which ", " when ",
    " where ", " how ", " why ", " about ", " into ", " through ",
    " during ", " before ", " after ", " company ", " business ",
    " report ", " reporting ",
];

/// Frequency heuristic over two fixed function-word lists; ties default to
/// English. Re-run whenever the snippet text is replaced.
pub fn detect_language(text: &str) -> Language {
    if text.is_empty() {
        return Language::En;
    }
    let lower = text.to_lowercase();
    let spanish = SPANISH_WORDS.iter().filter(|w| lower.contains(*w)).count();
    let english = ENGLISH_WORDS.iter().filter(|w| lower.contains(*w)).count();
    if spanish > english {
        Language::Es
    } else {
        Language::En
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Feed HTML parsing
// ───────────────────────────────────────────────────────────────────────────

/// Card container selectors, most specific first.
const CARD_SELECTORS: &[&str] = &[
    r#"div[data-urn*="urn:li:activity:"]"#,
    "div.occludable-update",
    "div.feed-shared-update-v2",
    "article",
];

const BANNER_SELECTORS: &[&str] = &[
    ".update-components-header",
    ".feed-shared-header",
    ".update-components-actor__sub-description",
    ".feed-shared-actor__sub-description",
    ".update-components-header__text-view",
];

const EMBEDDED_SELECTORS: &[&str] = &[
    ".update-components-mini-update-v2",
    ".feed-shared-mini-update-v2",
    ".update-components-update-v2__embedded-content",
    ".feed-shared-reshared-update-v2",
];

const ACTOR_NAME_SELECTOR: &str =
    ".update-components-actor__name, .feed-shared-actor__name";

const AUTHOR_SELECTORS: &[&str] = &[
    "span.update-components-actor__name",
    "span.feed-shared-actor__name",
    r#".update-components-actor__title span[aria-hidden="true"]"#,
    r#".feed-shared-actor__title span[aria-hidden="true"]"#,
    ".update-components-actor__name span",
    "span.hoverable-link-text",
];

const SNIPPET_SELECTORS: &[&str] = &[
    "div.update-components-update-v2__commentary",
    "div.feed-shared-update-v2__description",
    "div.update-components-text",
    "div.feed-shared-text",
    "span.break-words",
    r#".update-components-text span[dir="ltr"]"#,
];

const REACTIONS_SELECTOR: &str = "span.social-details-social-counts__reactions-count";
const SOCIAL_COUNTS_SELECTOR: &str = ".social-details-social-counts";

fn sel(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::Selector(e.to_string()))
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text_in(element: ElementRef<'_>, selectors: &[&str]) -> Result<Option<String>, ExtractError> {
    for selector in selectors {
        let parsed = sel(selector)?;
        if let Some(found) = element.select(&parsed).next() {
            let text = element_text(found);
            if !text.is_empty() {
                return Ok(Some(text));
            }
        }
    }
    Ok(None)
}

fn any_present(element: ElementRef<'_>, selectors: &[&str]) -> Result<bool, ExtractError> {
    for selector in selectors {
        let parsed = sel(selector)?;
        if element.select(&parsed).next().is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

fn ordered_region_texts(
    element: ElementRef<'_>,
    selectors: &[&str],
) -> Result<Vec<String>, ExtractError> {
    let mut regions = Vec::new();
    for selector in selectors {
        let parsed = sel(selector)?;
        if let Some(found) = element.select(&parsed).next() {
            let text = element_text(found);
            if !text.is_empty() {
                regions.push(text);
            }
        }
    }
    Ok(regions)
}

fn push_unique(links: &mut Vec<String>, href: &str) {
    let normalized = pulse_core::normalize_url(href);
    if !links.contains(&normalized) {
        links.push(normalized);
    }
}

fn card_from_element(element: ElementRef<'_>) -> Result<Card, ExtractError> {
    let urn = element
        .value()
        .attr("data-urn")
        .filter(|urn| urn.contains(ACTIVITY_URN_MARKER))
        .map(ToString::to_string);

    let descendant_urn = {
        let parsed = sel(r#"[data-urn*="urn:li:activity:"]"#)?;
        element
            .select(&parsed)
            .next()
            .and_then(|el| el.value().attr("data-urn"))
            .map(ToString::to_string)
    };

    let actor_sel = sel(ACTOR_NAME_SELECTOR)?;
    let mut actor_names = Vec::new();
    for actor in element.select(&actor_sel) {
        let name = element_text(actor);
        if !name.is_empty() && !actor_names.contains(&name) {
            actor_names.push(name);
        }
    }

    let link_sel = sel("a[href]")?;
    let mut post_links = Vec::new();
    let mut profile_links = Vec::new();
    for anchor in element.select(&link_sel) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if is_post_link(href) {
            push_unique(&mut post_links, href);
        }
        if is_profile_link(href) {
            push_unique(&mut profile_links, href);
        }
    }

    let reactions_sel = sel(REACTIONS_SELECTOR)?;
    let reaction_count_text = element
        .select(&reactions_sel)
        .next()
        .map(element_text)
        .filter(|text| !text.is_empty());

    let counts_sel = sel(SOCIAL_COUNTS_SELECTOR)?;
    let social_counts_text = element
        .select(&counts_sel)
        .next()
        .map(element_text)
        .filter(|text| !text.is_empty());

    Ok(Card {
        text: element_text(element),
        urn,
        descendant_urn,
        header_text: first_text_in(element, BANNER_SELECTORS)?,
        has_embedded_post: any_present(element, EMBEDDED_SELECTORS)?,
        actor_names,
        post_links,
        profile_links,
        author_regions: ordered_region_texts(element, AUTHOR_SELECTORS)?,
        snippet_regions: ordered_region_texts(element, SNIPPET_SELECTORS)?,
        reaction_count_text,
        social_counts_text,
    })
}

/// Parse a rendered search/feed page into cards, trying each container
/// strategy in order and keeping the first that matches anything.
pub fn parse_feed_html(html: &str) -> Result<Vec<Card>, ExtractError> {
    let document = Html::parse_document(html);
    for selector in CARD_SELECTORS {
        let parsed = sel(selector)?;
        let elements: Vec<_> = document.select(&parsed).collect();
        if elements.is_empty() {
            continue;
        }
        return elements.into_iter().map(card_from_element).collect();
    }
    Ok(Vec::new())
}

/// Parse a canonical post page into a single page-level card for
/// verification. The nested-update wrapper counts as an embedded post here.
pub fn parse_post_page(html: &str) -> Result<Card, ExtractError> {
    let document = Html::parse_document(html);
    let root = document.root_element();
    let mut card = card_from_element(root)?;

    let nested_sel = sel(
        ".feed-shared-update-v2__update-content-wrapper .feed-shared-update-v2",
    )?;
    if root.select(&nested_sel).next().is_some() {
        card.has_embedded_post = true;
    }
    Ok(card)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card_with_text(text: &str) -> Card {
        Card {
            text: text.to_string(),
            ..Card::default()
        }
    }

    fn original_card() -> Card {
        Card {
            text: "María López Our new ESG reporting platform just launched, covering \
                   scope 1, 2 and 3 emissions for mid-size companies across Europe."
                .to_string(),
            urn: Some("urn:li:activity:7123456789".to_string()),
            actor_names: vec!["María López".to_string()],
            author_regions: vec!["María López\nSustainability Lead".to_string()],
            snippet_regions: vec![
                "Our new ESG reporting platform just launched, covering scope 1, 2 \
                 and 3 emissions for mid-size companies across Europe."
                    .to_string(),
            ],
            reaction_count_text: Some("87".to_string()),
            social_counts_text: Some("87 · 12 comments".to_string()),
            ..Card::default()
        }
    }

    fn esg_spec() -> KeywordSpec {
        KeywordSpec {
            id: "esg".to_string(),
            label: "ESG".to_string(),
            search_terms: vec!["#esg".to_string()],
            tokens: vec!["#esg".to_string(), "esg ".to_string(), "esg reporting".to_string()],
        }
    }

    // Classifier

    #[test]
    fn activity_card_short_circuits_even_with_repost_signals() {
        let mut card = card_with_text("Jane Doe commented on this post: reposted content here");
        card.has_embedded_post = true;
        card.post_links = vec!["a".to_string(), "b".to_string()];
        assert_eq!(classify(&card), Disposition::Activity);
    }

    #[test]
    fn activity_phrases_are_word_bounded() {
        // "disliked" must not match "liked"
        let card = card_with_text("The board disliked-metrics narrative is changing fast across industries");
        assert!(!is_activity(&card.text));
        assert!(is_activity("Carlos liked this"));
        assert!(is_activity("Ana comentó en una publicación"));
    }

    #[test]
    fn header_phrase_signal_only_looks_at_header_region() {
        let mut late = "x ".repeat(300);
        late.push_str("reposted this");
        let card = card_with_text(&late);
        assert_ne!(repost_signal(&card), Some("header-phrase"));

        let card = card_with_text("Acme Corp reposted this We are hiring!");
        assert_eq!(repost_signal(&card), Some("header-phrase"));
    }

    #[test]
    fn each_structural_repost_signal_fires_alone() {
        let mut card = Card::default();
        card.header_text = Some("Acme ha compartido".to_string());
        assert_eq!(repost_signal(&card), Some("banner-region"));

        let mut card = Card::default();
        card.has_embedded_post = true;
        assert_eq!(repost_signal(&card), Some("embedded-post"));

        let mut card = Card::default();
        card.actor_names = vec!["A".to_string(), "B".to_string()];
        assert_eq!(repost_signal(&card), Some("multiple-actors"));

        let mut card = Card::default();
        card.post_links = vec!["/posts/1".to_string(), "/posts/2".to_string()];
        assert_eq!(repost_signal(&card), Some("multiple-post-links"));

        let card = card_with_text("great analysis shared from the climate desk");
        assert_eq!(repost_signal(&card), Some("attribution-phrase"));
    }

    #[test]
    fn clean_card_is_an_original_candidate() {
        assert_eq!(classify(&original_card()), Disposition::OriginalCandidate);
    }

    // Field extraction

    #[test]
    fn url_fallback_chain_prefers_card_urn() {
        let mut card = original_card();
        card.post_links = vec!["https://www.linkedin.com/posts/other-9".to_string()];
        let url = extract_url(&card).unwrap();
        assert_eq!(
            url,
            "https://www.linkedin.com/feed/update/urn:li:activity:7123456789/"
        );

        card.urn = None;
        assert_eq!(
            extract_url(&card).unwrap(),
            "https://www.linkedin.com/posts/other-9"
        );

        card.post_links.clear();
        card.descendant_urn = Some("urn:li:activity:42".to_string());
        assert_eq!(
            extract_url(&card).unwrap(),
            "https://www.linkedin.com/feed/update/urn:li:activity:42/"
        );

        card.descendant_urn = None;
        card.text.push_str(" urn:li:activity:555 ");
        assert_eq!(
            extract_url(&card).unwrap(),
            "https://www.linkedin.com/feed/update/urn:li:activity:555/"
        );
    }

    #[test]
    fn relative_post_links_gain_the_site_origin() {
        let mut card = Card::default();
        card.post_links = vec!["/feed/update/urn:li:activity:1/".to_string()];
        assert_eq!(
            extract_url(&card).unwrap(),
            "https://www.linkedin.com/feed/update/urn:li:activity:1/"
        );
    }

    #[test]
    fn missing_url_discards_with_no_url() {
        let card = card_with_text("a card with plenty of text but not a single usable link anywhere");
        let hint = KeywordHint { id: "esg", label: "#esg", spec: None };
        assert_eq!(extract_post(&card, &hint), Err(DiscardReason::NoUrl));
    }

    #[test]
    fn author_keeps_only_the_first_line() {
        let card = original_card();
        assert_eq!(extract_author(&card).as_deref(), Some("María López"));
    }

    #[test]
    fn short_snippet_is_discarded() {
        let mut card = original_card();
        card.snippet_regions = vec!["tiny".to_string()];
        card.text = "way too short".to_string();
        let hint = KeywordHint { id: "esg", label: "#esg", spec: None };
        assert_eq!(extract_post(&card, &hint), Err(DiscardReason::ShortSnippet));
    }

    #[test]
    fn keyword_gate_applies_only_with_a_spec() {
        let mut card = original_card();
        card.snippet_regions = vec![
            "A long reflection about supply chains and logistics with no topical \
             mention whatsoever in the entire body."
                .to_string(),
        ];
        card.text = card.snippet_regions[0].clone();

        let spec = esg_spec();
        let gated = KeywordHint { id: "esg", label: "#esg", spec: Some(&spec) };
        assert_eq!(extract_post(&card, &gated), Err(DiscardReason::NoKeyword));

        let global = KeywordHint { id: "global", label: "combined", spec: None };
        assert!(extract_post(&card, &global).is_ok());
    }

    #[test]
    fn extracted_post_has_consistent_metrics() {
        let spec = esg_spec();
        let hint = KeywordHint { id: "esg", label: "#esg", spec: Some(&spec) };
        let post = extract_post(&original_card(), &hint).unwrap();
        assert_eq!(post.likes, 87);
        assert_eq!(post.comments, 12);
        assert_eq!(post.reposts, 0);
        assert_eq!(post.total, 99);
        assert_eq!(post.score(), 99);
        assert_eq!(post.keyword_id, "esg");
        assert!(!post.verified);
    }

    #[test]
    fn probable_repost_heuristic_checks_prominent_unrelated_orgs() {
        let author = "María López";
        let unrelated = vec![
            "https://www.linkedin.com/in/maria-lopez".to_string(),
            "https://www.linkedin.com/company/acme-industries".to_string(),
        ];
        assert!(is_probable_repost(author, &unrelated));

        let own_company = vec![
            "https://www.linkedin.com/company/lopez-consulting".to_string(),
        ];
        assert!(!is_probable_repost(author, &own_company));

        let mut buried = vec![
            "https://www.linkedin.com/in/maria-lopez".to_string(),
            "https://www.linkedin.com/in/a".to_string(),
            "https://www.linkedin.com/in/b".to_string(),
            "https://www.linkedin.com/in/c".to_string(),
        ];
        buried.push("https://www.linkedin.com/company/acme-industries".to_string());
        assert!(!is_probable_repost(author, &buried));
    }

    // Metric parsing

    #[test]
    fn metric_counts_support_thousand_and_million_suffixes() {
        assert_eq!(parse_metric_count("1.2K"), 1_200);
        assert_eq!(parse_metric_count("3M"), 3_000_000);
        assert_eq!(parse_metric_count("1,234"), 1);
        assert_eq!(parse_metric_count("87"), 87);
        assert_eq!(parse_metric_count("87 reactions"), 87);
        assert_eq!(parse_metric_count(""), 0);
        assert_eq!(parse_metric_count("no numbers"), 0);
    }

    #[test]
    fn metric_before_finds_counts_next_to_their_label() {
        assert_eq!(metric_before("87 · 12 comments · 4 reposts", &["comment"]), 12);
        assert_eq!(metric_before("87 · 12 comments · 4 reposts", &["repost"]), 4);
        assert_eq!(metric_before("1.2K comentarios", &["comment", "comentario"]), 1_200);
        assert_eq!(metric_before("comments", &["comment"]), 0);
    }

    #[test]
    fn snippet_cleaning_collapses_whitespace_and_bounds_length() {
        assert_eq!(clean_snippet("  a\n\n b\tc  "), "a b c");
        let long = "word ".repeat(100);
        let cleaned = clean_snippet(&long);
        assert!(cleaned.ends_with("..."));
        assert!(cleaned.chars().count() <= SNIPPET_MAX_LEN + 3);
    }

    // Language

    #[test]
    fn language_detection_scores_function_words() {
        let es = "La empresa presenta su informe sobre sostenibilidad para el sector";
        let en = "The company released their report about sustainability for the sector";
        assert_eq!(detect_language(es), Language::Es);
        assert_eq!(detect_language(en), Language::En);
        assert_eq!(detect_language(""), Language::En);
    }

    // Feed parsing

    const FEED_FIXTURE: &str = r#"
      <html><body>
        <div data-urn="urn:li:activity:111" class="feed-shared-update-v2">
          <span class="update-components-actor__name">Dana Reyes</span>
          <a href="https://www.linkedin.com/in/dana-reyes?trk=x">Dana</a>
          <a href="https://www.linkedin.com/feed/update/urn:li:activity:111/?utm=1">post</a>
          <div class="update-components-update-v2__commentary">
            Double materiality assessments are finally getting the attention they deserve in ESG circles.
          </div>
          <div class="social-details-social-counts">
            <span class="social-details-social-counts__reactions-count">45</span>
            45 · 6 comments
          </div>
        </div>
        <div data-urn="urn:li:activity:222" class="feed-shared-update-v2">
          <div class="update-components-header">Acme Corp reposted this</div>
          <span class="update-components-actor__name">Acme Corp</span>
          <span class="update-components-actor__name">Original Author</span>
          <div class="update-components-text">Borrowed content</div>
        </div>
      </body></html>
    "#;

    #[test]
    fn feed_html_parses_into_typed_cards() {
        let cards = parse_feed_html(FEED_FIXTURE).unwrap();
        assert_eq!(cards.len(), 2);

        let first = &cards[0];
        assert_eq!(first.urn.as_deref(), Some("urn:li:activity:111"));
        assert_eq!(first.actor_names, vec!["Dana Reyes".to_string()]);
        assert_eq!(first.post_links.len(), 1);
        assert_eq!(
            first.post_links[0],
            "https://www.linkedin.com/feed/update/urn:li:activity:111/"
        );
        assert_eq!(first.profile_links.len(), 1);
        assert_eq!(first.reaction_count_text.as_deref(), Some("45"));
        assert_eq!(classify(first), Disposition::OriginalCandidate);

        let second = &cards[1];
        assert!(second.header_text.is_some());
        assert_eq!(second.actor_names.len(), 2);
        assert_eq!(classify(second), Disposition::Repost);
    }

    #[test]
    fn empty_feed_parses_to_no_cards() {
        let cards = parse_feed_html("<html><body><p>nothing here</p></body></html>").unwrap();
        assert!(cards.is_empty());
    }

    #[test]
    fn post_page_nested_update_marks_embedded_post() {
        let html = r#"
          <html><body>
            <div class="feed-shared-update-v2__update-content-wrapper">
              <div class="feed-shared-update-v2">nested original</div>
            </div>
          </body></html>
        "#;
        let card = parse_post_page(html).unwrap();
        assert!(card.has_embedded_post);
        assert_eq!(repost_signal(&card), Some("embedded-post"));
    }
}
