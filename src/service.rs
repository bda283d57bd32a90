//! Related-issue search, the call surface callers actually use.
//!
//! Validates the request before any network or cache work, reconciles
//! the repository's fingerprint cache, ranks it against the query, and
//! wraps the matches in a short report.

use serde::Serialize;

use crate::issues::RankedIssue;
use crate::semantic::embeddings::EmbeddingError;
use crate::semantic::ranker::IssueRanker;
use crate::sync::{SyncEngine, SyncError};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Missing fields: {}", fields.join(", "))]
    MissingFields { fields: Vec<String> },

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub owner: String,
    pub repository: String,
    pub title: String,
    pub description: Option<String>,
    /// Similarity floor override; the configured default applies when unset.
    pub threshold: Option<f32>,
}

/// Summary attached to every search response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchReport {
    pub total: usize,
    pub message: String,
}

impl SearchReport {
    fn for_matches(total: usize) -> Self {
        let message = if total > 0 {
            format!("There are {} related issues.", total)
        } else {
            "No related issues found.".to_string()
        };
        Self { total, message }
    }
}

pub struct IssueSearchService {
    engine: SyncEngine,
    ranker: IssueRanker,
    default_threshold: f32,
}

impl IssueSearchService {
    pub fn new(engine: SyncEngine, ranker: IssueRanker, default_threshold: f32) -> Self {
        Self {
            engine,
            ranker,
            default_threshold,
        }
    }

    /// Find cached issues semantically related to the described problem.
    ///
    /// Matches come back highest similarity first, together with a
    /// [`SearchReport`] summarizing the outcome.
    pub async fn find_related(
        &self,
        request: &SearchRequest,
    ) -> Result<(Vec<RankedIssue>, SearchReport), SearchError> {
        require_fields(&[
            ("owner", &request.owner),
            ("repository", &request.repository),
            ("title", &request.title),
        ])?;

        let records = self
            .engine
            .reconcile(&request.owner, &request.repository)
            .await?;

        let threshold = request.threshold.unwrap_or(self.default_threshold);
        let description = request.description.as_deref().unwrap_or("");
        let related = self
            .ranker
            .rank(&records, &request.title, description, threshold)
            .await?;

        let report = SearchReport::for_matches(related.len());
        log::info!(
            "{}/{}: {} of {} cached issues matched at threshold {}",
            request.owner,
            request.repository,
            related.len(),
            records.len(),
            threshold
        );
        Ok((related, report))
    }

    /// Refresh the cache for one repository without searching.
    /// Returns the number of records now cached for it.
    pub async fn sync_repository(&self, owner: &str, repo: &str) -> Result<usize, SearchError> {
        require_fields(&[("owner", owner), ("repository", repo)])?;
        let records = self.engine.reconcile(owner, repo).await?;
        Ok(records.len())
    }
}

/// Fail fast when required fields are blank, naming every missing one
/// in canonical order.
fn require_fields(fields: &[(&str, &str)]) -> Result<(), SearchError> {
    let missing: Vec<String> = fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(SearchError::MissingFields { fields: missing })
    }
}
