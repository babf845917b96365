//! # Language Tag Codec
//!
//! Converts between the short language codes clients send ("en", "fr") and the
//! full regional tags the recognition engine expects ("en-US", "fr-FR").
//!
//! ## Conventions:
//! - **Short code**: lowercase text before the first `-` of any tag
//! - **Full tag**: region-qualified BCP-47 tag, passed through untouched if the
//!   client already sent one
//!
//! Everything here is pure and total: unknown codes pass through unchanged.

/// Short code used when a client sends nothing at all.
pub const DEFAULT_SHORT: &str = "en";

/// Full tag used when a client sends nothing at all.
pub const DEFAULT_FULL: &str = "en-US";

/// Known short codes and the regional tag used for recognition.
const FULL_TAGS: &[(&str, &str)] = &[
    ("en", "en-US"),
    ("es", "es-ES"),
    ("fr", "fr-FR"),
    ("de", "de-DE"),
    ("it", "it-IT"),
    ("pt", "pt-PT"),
    ("hi", "hi-IN"),
    ("ja", "ja-JP"),
    ("ko", "ko-KR"),
    ("ar", "ar-SA"),
    ("am", "am-ET"),
];

/// Languages always offered to the engine when auto-detection is enabled.
pub const AUTO_DETECT_BASELINE: &[&str] = &[
    "en-US", "es-ES", "fr-FR", "de-DE", "it-IT", "pt-PT", "hi-IN", "ja-JP", "ko-KR", "zh-CN",
    "zh-TW", "ar-SA", "am-ET",
];

/// Expand a short code into a full regional tag.
///
/// ## Rules (in order):
/// 1. Empty input → [`DEFAULT_FULL`]
/// 2. Anything already carrying a `-` → unchanged (`"en-GB"`, `"zh-Hans"`)
/// 3. Known short code (`"en"`) → its regional tag
/// 4. Unknown short code → unchanged
pub fn to_full_tag(tag: &str) -> String {
    let tag = tag.trim();
    if tag.is_empty() {
        return DEFAULT_FULL.to_string();
    }
    if tag.contains('-') {
        return tag.to_string();
    }

    FULL_TAGS
        .iter()
        .find(|(short, _)| *short == tag)
        .map(|(_, full)| (*full).to_string())
        .unwrap_or_else(|| tag.to_string())
}

/// Reduce any tag to its lowercase short code (`"fr-CA"` → `"fr"`).
pub fn short_code(tag: &str) -> String {
    let short = tag.trim().split('-').next().unwrap_or_default();
    if short.is_empty() {
        DEFAULT_SHORT.to_string()
    } else {
        short.to_ascii_lowercase()
    }
}

/// Candidate languages for auto-detection: the selected source first, then the baseline.
///
/// Duplicates are removed while keeping the first occurrence, so the selected
/// source language always leads the list.
pub fn detection_candidates(source_full: &str) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::with_capacity(AUTO_DETECT_BASELINE.len() + 1);
    for tag in std::iter::once(source_full).chain(AUTO_DETECT_BASELINE.iter().copied()) {
        if !candidates.iter().any(|c| c.eq_ignore_ascii_case(tag)) {
            candidates.push(tag.to_string());
        }
    }
    candidates
}
