use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::semantic::{Embedder, IssueRanker};
use crate::service::{IssueSearchService, SearchError, SearchRequest};
use crate::store::MemoryIssueStore;

use super::support::{self, remote_issue, ScriptedSource, VocabEmbedder};

/// Service over scripted fixtures: a login bug with a comment thread,
/// a dark mode issue and a crash report.
fn service_with_corpus() -> (Arc<ScriptedSource>, IssueSearchService) {
    let source = Arc::new(ScriptedSource::new());
    let embedder = Arc::new(VocabEmbedder::new());
    let store = Arc::new(MemoryIssueStore::new());
    let engine = support::engine(&source, &embedder, &store);
    let ranker = IssueRanker::new(Arc::clone(&embedder) as Arc<dyn Embedder>);

    let mut login = remote_issue(7, "Login fails after password reset", "2024-05-01T12:00:00Z");
    login.body = Some("Entering the right password still fails.".to_string());
    source.set_issues(vec![
        login,
        remote_issue(12, "Dark mode toggle resets on restart", "2024-05-02T08:30:00Z"),
        remote_issue(3, "App crash when password is wrong", "2024-05-03T10:00:00Z"),
    ]);
    source.set_comments(7, &["Same here, login fails every time."]);

    (source, IssueSearchService::new(engine, ranker, 0.5))
}

fn login_request() -> SearchRequest {
    SearchRequest {
        owner: "acme".to_string(),
        repository: "widgets".to_string(),
        title: "Login fails".to_string(),
        description: Some("password login fails".to_string()),
        threshold: None,
    }
}

/// Default threshold: only the login issue scores close enough.
#[tokio::test]
async fn test_search_returns_semantically_close_issues() {
    let (_source, service) = service_with_corpus();

    let (related, report) = service.find_related(&login_request()).await.unwrap();

    assert_eq!(related.len(), 1);
    assert_eq!(related[0].number, 7);
    assert_eq!(related[0].title, "Login fails after password reset");
    assert_eq!(related[0].url, "https://github.com/acme/widgets/issues/7");
    assert_eq!(related[0].state, "open");
    assert!((related[0].score - 0.9428).abs() < 1e-3);

    assert_eq!(report.total, 1);
    assert_eq!(report.message, "There are 1 related issues.");
}

/// Lowering the threshold pulls in the crash report, ordered by score.
#[tokio::test]
async fn test_threshold_override_widens_the_net() {
    let (_source, service) = service_with_corpus();
    let mut request = login_request();
    request.threshold = Some(0.2);

    let (related, report) = service.find_related(&request).await.unwrap();

    let found: Vec<u64> = related.iter().map(|issue| issue.number).collect();
    assert_eq!(found, vec![7, 3]);
    assert!(related[0].score > related[1].score);
    assert_eq!(report.total, 2);
}

#[tokio::test]
async fn test_description_is_optional() {
    let (_source, service) = service_with_corpus();
    let request = SearchRequest {
        owner: "acme".to_string(),
        repository: "widgets".to_string(),
        title: "Dark mode toggle".to_string(),
        description: None,
        threshold: None,
    };

    let (related, _report) = service.find_related(&request).await.unwrap();

    assert_eq!(related.len(), 1);
    assert_eq!(related[0].number, 12);
    assert!(related[0].score > 0.99);
}

/// Validation failures happen before the source is ever contacted.
#[tokio::test]
async fn test_missing_fields_fail_before_any_network_call() {
    let (source, service) = service_with_corpus();
    let request = SearchRequest {
        repository: "widgets".to_string(),
        ..Default::default()
    };

    let err = service.find_related(&request).await.unwrap_err();

    assert!(matches!(err, SearchError::MissingFields { .. }));
    assert_eq!(err.to_string(), "Missing fields: owner, title");
    assert_eq!(source.list_calls.load(Ordering::SeqCst), 0);
    assert_eq!(source.comment_fetches(), 0);
}

#[tokio::test]
async fn test_no_matches_reports_plainly() {
    let (_source, service) = service_with_corpus();
    let request = SearchRequest {
        owner: "acme".to_string(),
        repository: "widgets".to_string(),
        title: "Printer output is blank".to_string(),
        description: None,
        threshold: None,
    };

    let (related, report) = service.find_related(&request).await.unwrap();

    assert!(related.is_empty());
    assert_eq!(report.total, 0);
    assert_eq!(report.message, "No related issues found.");
}

#[tokio::test]
async fn test_sync_repository_counts_records() {
    let (source, service) = service_with_corpus();

    let count = service.sync_repository("acme", "widgets").await.unwrap();

    assert_eq!(count, 3);
    assert_eq!(source.list_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sync_repository_validates_fields() {
    let (_source, service) = service_with_corpus();

    let err = service.sync_repository("", "widgets").await.unwrap_err();

    assert_eq!(err.to_string(), "Missing fields: owner");
}
