//! Incremental cache reconciliation.
//!
//! `reconcile` brings the cached fingerprint set for one repository in
//! line with the remote issue list. The remote `updated_at` marker is
//! the only staleness signal: records that match it are carried forward
//! untouched, everything else is rebuilt by fetching the comment thread
//! and re-embedding it. Refreshes fan out as tasks, results are gathered
//! without cancelling anything, and the cache is mutated in exactly one
//! delete batch plus one insert batch once every task has settled.

use std::collections::HashMap;
use std::sync::Arc;

use crate::fingerprint;
use crate::github::{GithubError, IssueSource, RemoteIssue};
use crate::issues::{repository_key, CachedIssue, IssueKey};
use crate::semantic::embeddings::{Embedder, EmbeddingError};
use crate::semantic::preprocess::embedding_input;
use crate::store::{IssueStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Github(#[from] GithubError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Could not refresh issues: {}", format_issue_numbers(issue_numbers))]
    FetchFailed { issue_numbers: Vec<u64> },
}

fn format_issue_numbers(numbers: &[u64]) -> String {
    numbers
        .iter()
        .map(|n| format!("#{}", n))
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct SyncEngine {
    source: Arc<dyn IssueSource>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn IssueStore>,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn IssueSource>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn IssueStore>,
    ) -> Self {
        Self {
            source,
            embedder,
            store,
        }
    }

    /// Reconcile the cache against the remote issue list and return the
    /// up-to-date record set in remote listing order.
    ///
    /// Failure behavior:
    /// - listing or cache-read failures propagate before anything runs;
    /// - per-issue refresh failures never cancel sibling tasks. Records
    ///   that did refresh are committed, then the call errors: a rate
    ///   limit observed on any task wins, otherwise `FetchFailed` names
    ///   every issue that could not be refreshed.
    ///
    /// Concurrent reconciles of different repositories are fine; running
    /// two for the same repository at once is the caller's mistake.
    pub async fn reconcile(&self, owner: &str, repo: &str) -> Result<Vec<CachedIssue>, SyncError> {
        let repository = repository_key(owner, repo);

        let mut cached: HashMap<u64, CachedIssue> = self
            .store
            .select_by_repository(&repository)?
            .into_iter()
            .map(|record| (record.number, record))
            .collect();

        let remote = self.source.list_issues(owner, repo).await?;

        // Result slots in listing order; fresh records fill theirs now,
        // refreshed ones after the fan-out.
        let mut slots: Vec<Option<CachedIssue>> = Vec::with_capacity(remote.len());
        let mut refreshes: Vec<(usize, RemoteIssue, bool)> = Vec::new();
        for issue in remote {
            match cached.remove(&issue.number) {
                Some(record) if record.updated_at == issue.updated_at => {
                    slots.push(Some(record));
                }
                Some(_) => {
                    refreshes.push((slots.len(), issue, true));
                    slots.push(None);
                }
                None => {
                    refreshes.push((slots.len(), issue, false));
                    slots.push(None);
                }
            }
        }

        if refreshes.is_empty() {
            log::debug!("{}: all {} issues fresh, nothing to do", repository, slots.len());
            return Ok(slots.into_iter().flatten().collect());
        }
        log::info!(
            "{}: {} fresh, refreshing {}",
            repository,
            slots.len() - refreshes.len(),
            refreshes.len()
        );

        let mut handles = Vec::with_capacity(refreshes.len());
        for (slot, issue, existed) in refreshes {
            let source = Arc::clone(&self.source);
            let embedder = Arc::clone(&self.embedder);
            let repository = repository.clone();
            let owner = owner.to_string();
            let repo = repo.to_string();
            let number = issue.number;
            let handle = tokio::spawn(async move {
                refresh_issue(source, embedder, repository, owner, repo, issue).await
            });
            handles.push((slot, number, existed, handle));
        }

        let mut inserts: Vec<CachedIssue> = Vec::new();
        let mut insert_slots: Vec<usize> = Vec::new();
        let mut replaced_keys: Vec<IssueKey> = Vec::new();
        let mut failed: Vec<u64> = Vec::new();
        let mut rate_limited: Option<GithubError> = None;

        // Awaiting in spawn order keeps failure reporting deterministic
        for (slot, number, existed, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    log::error!("refresh task for issue #{} panicked: {}", number, join_err);
                    failed.push(number);
                    continue;
                }
            };

            match outcome {
                Ok(record) => {
                    if existed {
                        replaced_keys.push(record.key());
                    }
                    insert_slots.push(slot);
                    inserts.push(record);
                }
                Err(SyncError::Github(err @ GithubError::RateLimited { .. })) => {
                    log::warn!("rate limited while refreshing issue #{}", number);
                    if rate_limited.is_none() {
                        rate_limited = Some(err);
                    }
                }
                Err(err) => {
                    log::warn!("refresh of issue #{} failed: {}", number, err);
                    failed.push(number);
                }
            }
        }

        // Single commit: whatever refreshed successfully becomes durable
        // even when the call errors below.
        if !replaced_keys.is_empty() {
            self.store.bulk_delete(&replaced_keys)?;
        }
        if !inserts.is_empty() {
            self.store.bulk_insert(&inserts)?;
        }

        if let Some(err) = rate_limited {
            return Err(err.into());
        }
        if !failed.is_empty() {
            return Err(SyncError::FetchFailed {
                issue_numbers: failed,
            });
        }

        for (slot, record) in insert_slots.into_iter().zip(inserts) {
            slots[slot] = Some(record);
        }
        Ok(slots.into_iter().flatten().collect())
    }
}

/// Build a fresh cache record for one issue: comment thread, normalized
/// embedding input, fingerprint.
async fn refresh_issue(
    source: Arc<dyn IssueSource>,
    embedder: Arc<dyn Embedder>,
    repository: String,
    owner: String,
    repo: String,
    issue: RemoteIssue,
) -> Result<CachedIssue, SyncError> {
    let remote_comments = source.list_comments(&owner, &repo, issue.number).await?;

    // Body first, then comments; null bodies become empty strings so
    // positions stay stable.
    let mut comments = Vec::with_capacity(remote_comments.len() + 1);
    comments.push(issue.body.unwrap_or_default());
    comments.extend(
        remote_comments
            .into_iter()
            .map(|comment| comment.body.unwrap_or_default()),
    );

    let text = embedding_input(&issue.title, &comments);
    let vector = embedder.embed(&text).await?;
    let (fingerprint, shape) = fingerprint::encode(&vector);

    Ok(CachedIssue {
        repository,
        number: issue.number,
        title: issue.title,
        url: issue.url,
        state: issue.state,
        comments,
        fingerprint,
        shape,
        updated_at: issue.updated_at,
    })
}
