use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Find cached issues related to a described problem
    Search {
        /// Repository owner (user or organization)
        #[clap(short, long)]
        owner: String,

        /// Repository name
        #[clap(short, long)]
        repository: String,

        /// Problem title
        #[clap(short, long)]
        title: String,

        /// Problem description
        #[clap(short, long)]
        description: Option<String>,

        /// Similarity threshold override [0.0, 1.0]
        #[clap(long)]
        threshold: Option<f32>,
    },

    /// Refresh the issue cache for a repository without searching
    Sync {
        /// Repository owner (user or organization)
        #[clap(short, long)]
        owner: String,

        /// Repository name
        #[clap(short, long)]
        repository: String,
    },
}
