//! Text normalization for embedding input.
//!
//! Issue threads and query text go through the same pipeline so their
//! fingerprints stay comparable:
//! 1. Strip URLs, @mentions and #tags
//! 2. Strip everything outside ASCII letters, digits and whitespace
//! 3. Collapse whitespace runs, trim, lowercase

use once_cell::sync::Lazy;
use regex::Regex;

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"http\S+").unwrap());
static MENTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@\w+").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"#\S+").unwrap());
static NON_ALNUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9\s]").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Normalize free-form text down to lowercase words.
pub fn normalize(text: &str) -> String {
    let text = URL_RE.replace_all(text, "");
    let text = MENTION_RE.replace_all(&text, "");
    let text = TAG_RE.replace_all(&text, "");
    let text = NON_ALNUM_RE.replace_all(&text, "");
    let text = WHITESPACE_RE.replace_all(&text, " ");
    text.trim().to_lowercase()
}

/// Build the embedding input for a title plus its accompanying texts.
///
/// Cache time passes the issue body and comment bodies; query time passes
/// the problem description. Both sides land on `"{title}: {joined}"`
/// before normalization.
pub fn embedding_input(title: &str, texts: &[String]) -> String {
    normalize(&format!("{}: {}", title, texts.join(" ")))
}
