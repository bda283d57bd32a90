use serde::Serialize;

/// Build the composite repository key used everywhere downstream.
pub fn repository_key(owner: &str, repo: &str) -> String {
    format!("{}/{}", owner, repo)
}

/// One cached issue: remote descriptive fields plus the semantic
/// fingerprint computed from its comment thread.
///
/// Records are replaced whole on refresh, never patched in place.
/// `updated_at` holds the remote modification marker verbatim and is
/// the only input to the freshness decision.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedIssue {
    pub repository: String,
    pub number: u64,

    pub title: String,
    pub url: String,
    pub state: String,

    /// Issue body first (empty string when the remote body is null),
    /// then comment bodies in API return order.
    pub comments: Vec<String>,

    /// Serialized embedding, little-endian f32 bytes.
    pub fingerprint: Vec<u8>,
    /// Comma-joined dimension sizes, "768" for a 1-D vector.
    pub shape: String,

    pub updated_at: String,
}

impl CachedIssue {
    pub fn key(&self) -> IssueKey {
        IssueKey {
            repository: self.repository.clone(),
            number: self.number,
        }
    }
}

/// Composite key identifying a cached issue record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssueKey {
    pub repository: String,
    pub number: u64,
}

/// Display projection of a matched issue. Fingerprint bytes never
/// leave the cache, so this is what callers and the CLI see.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedIssue {
    pub repository: String,
    pub number: u64,
    pub title: String,
    pub url: String,
    pub state: String,
    pub comments: Vec<String>,
    pub score: f32,
}

impl RankedIssue {
    pub fn from_cached(issue: &CachedIssue, score: f32) -> Self {
        Self {
            repository: issue.repository.clone(),
            number: issue.number,
            title: issue.title.clone(),
            url: issue.url.clone(),
            state: issue.state.clone(),
            comments: issue.comments.clone(),
            score,
        }
    }
}
