//! lineage - firmware fuzzy-digest similarity & clustering

mod cluster_cli;
mod digest_cli;

use clap::{Parser, Subcommand};
use cluster::{get_db_path, EngineConfig, Store};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lineage")]
#[command(about = "Fuzzy-digest similarity and clustering for firmware files", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Digest files and store the results
    Digest(digest_cli::DigestArgs),
    /// Rebuild the similarity index from stored digests
    Index(cluster_cli::IndexArgs),
    /// Cluster stored digests
    Cluster(cluster_cli::ClusterArgs),
    /// Show a stored cluster result
    Show {
        /// Result ID
        id: i64,
        /// Max groups to print
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Print groups and graph as JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored cluster results
    Results {
        /// Max results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Digest(args) => digest_cli::run(args).await?,
        Commands::Index(args) => cluster_cli::run_index(args)?,
        Commands::Cluster(args) => cluster_cli::run_cluster(args).await?,
        Commands::Show { id, limit, json } => cluster_cli::run_show(id, limit, json)?,
        Commands::Results { limit } => cluster_cli::run_results(limit)?,
    }

    Ok(())
}

fn ensure_store() -> anyhow::Result<Store> {
    let db_path = get_db_path();
    Ok(Store::open(&db_path)?.with_config(EngineConfig::from_env()))
}

fn parse_algorithm(s: &str) -> anyhow::Result<fuzzy::Algorithm> {
    fuzzy::Algorithm::from_str(s).ok_or_else(|| anyhow::anyhow!("unknown algorithm: {} (tlsh, lzjd)", s))
}
