use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod fingerprint;
mod github;
mod issues;
mod semantic;
mod service;
mod store;
mod sync;
#[cfg(test)]
mod tests;

use config::Config;
use github::GithubClient;
use semantic::{Embedder, FastembedEmbedder, IssueRanker};
use service::{IssueSearchService, SearchRequest};
use store::FileIssueStore;
use sync::SyncEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();
    let config = Config::load();

    let embedder = Arc::new(FastembedEmbedder::new(
        &config.search.model,
        config.model_cache_dir(),
    )?);
    let store = Arc::new(FileIssueStore::new(config.cache_dir(), embedder.model_id())?);
    let source = Arc::new(GithubClient::new(&config.github)?);

    let engine = SyncEngine::new(source, embedder.clone(), store);
    let ranker = IssueRanker::new(embedder);
    let service = IssueSearchService::new(engine, ranker, config.search.default_threshold);

    match args.command {
        cli::Command::Search {
            owner,
            repository,
            title,
            description,
            threshold,
        } => {
            let request = SearchRequest {
                owner,
                repository,
                title,
                description,
                threshold,
            };
            let (related, report) = service.find_related(&request).await?;

            let output = serde_json::json!({
                "related_issues": related,
                "total": report.total,
                "message": report.message,
            });
            println!("{}", serde_json::to_string_pretty(&output).unwrap());
        }

        cli::Command::Sync { owner, repository } => {
            let count = service.sync_repository(&owner, &repository).await?;
            println!("{} issues cached for {}/{}", count, owner, repository);
        }
    }

    Ok(())
}
