//! index / cluster / show subcommands

use std::time::Instant;

use clap::Args;
use cluster::{
    CancelFlag, ClusterParams, ClusterResult, IndexParams, LocalIndexLock, MemberSelector, Method,
};

use crate::{ensure_store, parse_algorithm};

#[derive(Args)]
pub struct IndexArgs {
    /// Characters per band
    #[arg(short, long)]
    band_width: usize,
    /// Minimum shared bands for a candidate pair
    #[arg(short, long)]
    threshold: usize,
    /// Algorithm (tlsh)
    #[arg(short, long, default_value = "tlsh")]
    algorithm: String,
}

#[derive(Args)]
pub struct ClusterArgs {
    /// Method (exhaustive, indexed)
    #[arg(short, long, default_value = "exhaustive")]
    method: String,
    /// Distance threshold, negative disables filtering
    #[arg(short, long, allow_negative_numbers = true)]
    threshold: i32,
    /// Filename regex
    #[arg(short, long)]
    regex: Option<String>,
    /// Firmware IDs to include (repeatable)
    #[arg(short, long)]
    firmware: Vec<String>,
    /// Description stored with the result
    #[arg(short, long)]
    description: Option<String>,
    /// Algorithm (tlsh, lzjd)
    #[arg(short, long, default_value = "tlsh")]
    algorithm: String,
}

pub fn run_index(args: IndexArgs) -> anyhow::Result<()> {
    let algorithm = parse_algorithm(&args.algorithm)?;
    let params = IndexParams::new(args.band_width, args.threshold)?;

    let mut store = ensure_store()?;
    let lock = LocalIndexLock::new();
    let start = Instant::now();
    let id = store.rebuild_index(&lock, algorithm, params)?;

    println!("Index snapshot: {}", id);
    println!("Bands per digest: {}", params.band_count());
    println!("Built in {:.2?}", start.elapsed());
    Ok(())
}

pub async fn run_cluster(args: ClusterArgs) -> anyhow::Result<()> {
    let algorithm = parse_algorithm(&args.algorithm)?;
    let method = Method::from_str(&args.method)
        .ok_or_else(|| anyhow::anyhow!("unknown method: {} (exhaustive, indexed)", args.method))?;
    let selector = MemberSelector::new(args.regex.as_deref(), args.firmware.iter().cloned())?;

    let mut params = ClusterParams::new(method, args.threshold);
    params.description = args.description.clone();

    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    let start = Instant::now();

    let mut task = tokio::task::spawn_blocking(move || -> anyhow::Result<(i64, ClusterResult, Vec<usize>)> {
        let mut store = ensure_store()?;
        let (id, result) = store.cluster(algorithm, &selector, params, cancel)?;
        let sizes = result.group_sizes().resolve(store.db())?;
        Ok((id, result, sizes))
    });

    let outcome = tokio::select! {
        joined = &mut task => joined?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupt received, cancelling clustering");
            flag.cancel();
            task.await?
        }
    };
    let (id, result, sizes) = outcome?;

    println!("Result: {}", id);
    println!("Members: {} ({} skipped upstream)", result.member_count(), result.skipped_count());
    println!("Groups: {}", result.group_count());
    let multi = sizes.iter().filter(|&&n| n > 1).count();
    println!("Groups with 2+ members: {}", multi);
    println!("Took {:.2?}", start.elapsed());
    Ok(())
}

pub fn run_show(id: i64, limit: usize, json: bool) -> anyhow::Result<()> {
    let store = ensure_store()?;
    let Some((record, result, resolved)) = store.load_result(id)? else {
        println!("Result not found: {}", id);
        return Ok(());
    };

    if json {
        let graph: serde_json::Value = serde_json::from_slice(&resolved.graph.to_node_link_json()?)?;
        let out = serde_json::json!({
            "id": record.id,
            "method": result.method().as_str(),
            "algorithm": result.algorithm().as_str(),
            "distance_threshold": result.distance_threshold(),
            "groups": resolved.groups,
            "graph": graph,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Result {} ({})", record.id, record.created_at);
    println!("Method: {}", result.method().as_str());
    println!("Algorithm: {}", result.algorithm());
    println!("Threshold: {}", result.distance_threshold());
    println!("Regex: {}", result.regex_filter().unwrap_or("-"));
    println!("Description: {}", result.description().unwrap_or("-"));
    println!("Members: {} ({} skipped upstream)", result.member_count(), result.skipped_count());
    println!("Edges: {}", resolved.graph.edges().len());
    println!("Graph blob: {}", result.graph_blob());
    println!();

    for (i, group) in resolved.groups.iter().filter(|g| g.len() > 1).take(limit).enumerate() {
        println!("[{}] {} members", i + 1, group.len());
        for label in group {
            println!("    {}", label);
        }
    }
    Ok(())
}

pub fn run_results(limit: usize) -> anyhow::Result<()> {
    let store = ensure_store()?;
    let records = store.db().list_results(limit)?;

    if records.is_empty() {
        println!("No cluster results.");
        return Ok(());
    }

    for r in records {
        println!(
            "[{}] {} {} threshold={} members={} skipped={} {}",
            r.id,
            r.method.as_str(),
            r.algorithm,
            r.distance_threshold,
            r.member_count,
            r.skipped_count,
            r.created_at
        );
        if let Some(desc) = r.description {
            println!("    {}", desc);
        }
    }
    Ok(())
}
