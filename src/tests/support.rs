//! Shared fakes for the integration suites: a scripted issue source and
//! a vocabulary embedder with hand-computable cosine scores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::github::{GithubError, IssueSource, RemoteComment, RemoteIssue};
use crate::semantic::embeddings::{model_identity, Embedder, EmbeddingError};
use crate::store::MemoryIssueStore;
use crate::sync::SyncEngine;

/// Failure a [`ScriptedSource`] call should produce. Errors are built
/// fresh on every call since [`GithubError`] carries no Clone.
#[derive(Debug, Clone, Copy)]
pub enum Outage {
    Status(u16),
    RateLimited(i64),
}

impl Outage {
    fn to_error(self) -> GithubError {
        match self {
            Outage::Status(status) => GithubError::Status {
                status,
                url: "http://stub.test/".to_string(),
            },
            Outage::RateLimited(reset_epoch) => GithubError::RateLimited { reset_epoch },
        }
    }
}

/// In-memory [`IssueSource`] driven entirely by the test: fixed issue
/// listing, per-issue comment threads, per-call counters and injectable
/// failures.
#[derive(Default)]
pub struct ScriptedSource {
    issues: Mutex<Vec<RemoteIssue>>,
    comments: Mutex<HashMap<u64, Vec<RemoteComment>>>,
    comment_outages: Mutex<HashMap<u64, Outage>>,
    list_outage: Mutex<Option<Outage>>,
    pub list_calls: AtomicUsize,
    pub comment_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_issues(&self, issues: Vec<RemoteIssue>) {
        *self.issues.lock().unwrap() = issues;
    }

    pub fn set_comments(&self, number: u64, bodies: &[&str]) {
        let comments = bodies
            .iter()
            .map(|body| RemoteComment {
                body: Some(body.to_string()),
            })
            .collect();
        self.comments.lock().unwrap().insert(number, comments);
    }

    pub fn fail_comments(&self, number: u64, outage: Outage) {
        self.comment_outages.lock().unwrap().insert(number, outage);
    }

    pub fn fail_listing(&self, outage: Outage) {
        *self.list_outage.lock().unwrap() = Some(outage);
    }

    pub fn comment_fetches(&self) -> usize {
        self.comment_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IssueSource for ScriptedSource {
    async fn list_issues(&self, _owner: &str, _repo: &str) -> Result<Vec<RemoteIssue>, GithubError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(outage) = *self.list_outage.lock().unwrap() {
            return Err(outage.to_error());
        }
        Ok(self.issues.lock().unwrap().clone())
    }

    async fn list_comments(
        &self,
        _owner: &str,
        _repo: &str,
        number: u64,
    ) -> Result<Vec<RemoteComment>, GithubError> {
        self.comment_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(outage) = self.comment_outages.lock().unwrap().get(&number) {
            return Err(outage.to_error());
        }
        Ok(self
            .comments
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .unwrap_or_default())
    }
}

/// Words the [`VocabEmbedder`] knows. One dimension per word, anything
/// else is dropped, so every cosine score in the suites can be checked
/// by hand.
const VOCAB: &[&str] = &[
    "login", "fails", "password", "reset", "dark", "mode", "toggle", "crash",
];

/// Deterministic word-count embedder over a fixed vocabulary.
#[derive(Default)]
pub struct VocabEmbedder {
    fail_on: Mutex<Option<String>>,
    pub embed_calls: AtomicUsize,
}

impl VocabEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make any embed whose input contains `needle` fail.
    pub fn fail_on(&self, needle: &str) {
        *self.fail_on.lock().unwrap() = Some(needle.to_string());
    }

    pub fn embeds(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for VocabEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(needle) = self.fail_on.lock().unwrap().as_deref() {
            if text.contains(needle) {
                return Err(EmbeddingError::EmbeddingFailed(format!(
                    "input contains {:?}",
                    needle
                )));
            }
        }

        let mut vector = vec![0.0f32; VOCAB.len()];
        for word in text.split_whitespace() {
            if let Some(slot) = VOCAB.iter().position(|known| *known == word) {
                vector[slot] += 1.0;
            }
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        VOCAB.len()
    }

    fn model_id(&self) -> [u8; 32] {
        model_identity("vocab-test-embedder")
    }
}

pub fn remote_issue(number: u64, title: &str, updated_at: &str) -> RemoteIssue {
    RemoteIssue {
        number,
        title: title.to_string(),
        url: format!("https://github.com/acme/widgets/issues/{}", number),
        state: "open".to_string(),
        body: None,
        updated_at: updated_at.to_string(),
    }
}

/// Wires a [`SyncEngine`] over the given fakes.
pub fn engine(
    source: &Arc<ScriptedSource>,
    embedder: &Arc<VocabEmbedder>,
    store: &Arc<MemoryIssueStore>,
) -> SyncEngine {
    SyncEngine::new(
        Arc::clone(source) as Arc<dyn IssueSource>,
        Arc::clone(embedder) as Arc<dyn Embedder>,
        Arc::clone(store) as Arc<dyn crate::store::IssueStore>,
    )
}
