//! digest subcommand - generate and store fuzzy digests

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Args;
use fuzzy::{digest_corpus, DigestConfig, DigestGenerator, SourceFile};
use sha2::{Digest, Sha256};

use crate::{ensure_store, parse_algorithm};

#[derive(Args)]
pub struct DigestArgs {
    /// Files or directories (walked recursively)
    #[arg(required = true)]
    paths: Vec<PathBuf>,
    /// Algorithm (tlsh, lzjd)
    #[arg(short, long, default_value = "tlsh")]
    algorithm: String,
    /// Firmware ID recorded with every digest
    #[arg(short, long)]
    firmware: Option<String>,
}

pub async fn run(args: DigestArgs) -> anyhow::Result<()> {
    let algorithm = parse_algorithm(&args.algorithm)?;

    let mut files = Vec::new();
    for path in &args.paths {
        collect_files(&path.canonicalize()?, &mut files)?;
    }
    tracing::debug!("collected {} files from {} paths", files.len(), args.paths.len());
    println!("Files: {}", files.len());
    println!("Algorithm: {}", algorithm);
    if let Some(ref fw) = args.firmware {
        println!("Firmware: {}", fw);
    }
    println!();

    let generator = DigestGenerator::new(algorithm)?.with_config(DigestConfig::from_env());
    let start = Instant::now();
    let corpus = tokio::task::spawn_blocking(move || digest_corpus(&generator, &files)).await?;
    println!("Digested in {:.2?}", start.elapsed());

    let store = ensure_store()?;
    let stored = store.ingest(&corpus, algorithm, args.firmware.as_deref())?;

    println!("Stored: {}", stored);
    println!("Skipped: {}", corpus.skipped.len());
    for skipped in &corpus.skipped {
        println!("  {} [{}]: {}", skipped.filename, skipped.file_id, skipped.reason);
    }
    Ok(())
}

fn collect_files(path: &Path, out: &mut Vec<SourceFile>) -> anyhow::Result<()> {
    if path.is_dir() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
            .map(|e| e.map(|e| e.path()))
            .collect::<Result<_, _>>()?;
        entries.sort();
        for entry in entries {
            collect_files(&entry, out)?;
        }
    } else if path.is_file() {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        out.push(SourceFile::new(file_id(path), filename, path));
    }
    Ok(())
}

/// 规范路径的 SHA-256 前 16 位
fn file_id(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_string()
}
