//! Decides from prompt text alone whether a request wants live information
//! (weather, runway schedules, prices, news) and should therefore run with
//! search grounding enabled.

use std::sync::LazyLock;

use regex::Regex;

/// Maximum gap, in characters, between a temporal marker and a topic.
pub const PROXIMITY_WINDOW: usize = 80;

const DIRECT_PATTERNS: &[&str] = &[
    r"\b(2025|2026|latest|trend\w*|fashion week|met gala)\b",
    r"\btoday'?s weather\b",
    r"\btoday'?s temperature\b",
    r"\bweather (forecast|report|update)s?\b",
    r"\brain (radar|tracker)\b",
    r"\bair\s+quality\b",
    r"\bcrypto (price|chart|update)\b",
    r"\bbitcoin (price|chart|update)\b",
    r"\bmarket (open|close)\b",
    r"\blatest news\b",
    r"\brecent events?\b",
    r"\blive (news|coverage|feed)\b",
    r"\bfashion week (schedule|calendar|lineup)\b",
    r"\bfashion show (schedule|livestream|coverage)\b",
    r"\brunway (schedule|livestream|coverage)\b",
    r"\bred carpet (coverage|arrivals)\b",
    r"\baward show (lineup|coverage)\b",
    r"\blast night'?s (runway|red carpet|show)\b",
    r"\b(celebrity|influencer)\s+(look|outfit)\s+(today|tonight|last\s+night)\b",
    r"\bcollection drop\b",
    r"\brelease date\b",
];

const TEMPORAL_MARKER: &str = concat!(
    r"(?:",
    r"today(?:'s)?|tonight|tomorrow|current(?:ly)?|latest|recent|breaking|",
    r"live|upcoming|right\s+now|real[-\s]?time|this\s+week|next\s+week|",
    r"this\s+month|next\s+month|this\s+season|next\s+season|forecast|update|",
    r"up[-\s]?to[-\s]?date|today\s+only",
    r")"
);

const TOPIC: &str = concat!(
    r"(?:",
    r"event|events|headline|runway|fashion\s+week|fashion\s+show|runway\s+show|",
    r"collection\s+drop|capsule\s+drop|product\s+drop|restock|release|lineup|",
    r"schedule|calendar|red\s+carpet|award\s+show|premiere|street\s+style|",
    r"lookbook|front\s+row",
    r")"
);

static DIRECT: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    DIRECT_PATTERNS
        .iter()
        .map(|pattern| Regex::new(&format!("(?i){pattern}")).expect("valid direct pattern"))
        .collect()
});

static PROXIMITY: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    let window = PROXIMITY_WINDOW;
    [
        Regex::new(&format!(r"(?is){TEMPORAL_MARKER}[\s\S]{{0,{window}}}{TOPIC}"))
            .expect("valid proximity pattern"),
        Regex::new(&format!(r"(?is){TOPIC}[\s\S]{{0,{window}}}{TEMPORAL_MARKER}"))
            .expect("valid proximity pattern"),
    ]
});

/// Returns true when the prompt likely needs live, external information.
pub fn needs_search_grounding(prompt: &str) -> bool {
    if prompt.is_empty() {
        return false;
    }
    let normalized = prompt.to_lowercase();
    let hit = DIRECT.iter().any(|pattern| pattern.is_match(&normalized))
        || PROXIMITY.iter().any(|pattern| pattern.is_match(&normalized));
    if hit {
        tracing::info!(
            prompt = %prompt,
            "prompt likely contains info that could benefit from search grounding"
        );
    }
    hit
}
