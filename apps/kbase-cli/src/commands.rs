use std::io::{self, BufRead as _, Write as _};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use walkdir::WalkDir;

use kbase_core::{CancelFlag, DocumentFormat, Error};
use kbase_pipeline::KnowledgeBase;

/// Expands directories into the supported files beneath them, sorted.
pub fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .into_iter()
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().is_file() && DocumentFormat::is_supported(e.path()))
                .map(|e| e.path().to_path_buf())
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    files
}

pub async fn ingest(kb: &KnowledgeBase, paths: &[PathBuf], collection: Option<&str>, name: Option<&str>) -> Result<()> {
    let files = collect_files(paths);
    if name.is_some() && files.len() != 1 {
        bail!("--name needs exactly one file, got {}", files.len());
    }
    if files.is_empty() {
        println!("No supported files found ({})", DocumentFormat::EXTENSIONS.join(", "));
        return Ok(());
    }

    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current batch");
            on_interrupt.cancel();
        }
    });

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let (mut chunks, mut failed) = (0usize, 0usize);
    for file in &files {
        pb.set_message(short_name(file));
        match kb.ingest_with_cancel(file, collection, name, &cancel).await {
            Ok(stored) => chunks += stored,
            Err(Error::Cancelled { committed }) => {
                pb.abandon_with_message("cancelled");
                println!("Cancelled: {committed} chunks of {} were already stored", file.display());
                return Ok(());
            }
            Err(e) if files.len() == 1 => return Err(e.into()),
            Err(e) => {
                failed += 1;
                pb.suspend(|| eprintln!("skipped {}: {e}", file.display()));
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    let target = collection.unwrap_or(kb.default_collection());
    info!(files = files.len(), chunks, failed, "ingest complete");
    println!("Stored {chunks} chunks from {} files in '{target}'", files.len() - failed);
    if failed > 0 {
        println!("{failed} files failed");
    }
    Ok(())
}

pub async fn query(kb: &KnowledgeBase, question: &str, collection: Option<&str>, k: Option<usize>, json: bool) -> Result<()> {
    let hits = kb.query(question, collection, k).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("No relevant passages found");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        let page = hit.metadata.get("page").map(|p| format!(" p.{p}")).unwrap_or_default();
        println!("\n{}. similarity={:.4}  {}{page}", i + 1, hit.similarity(), hit.metadata.source_file);
        println!("   {}", hit.text.replace('\n', "\n   "));
    }
    Ok(())
}

pub async fn ask(kb: &KnowledgeBase, question: &str, collection: Option<&str>, k: Option<usize>) -> Result<()> {
    let answer = kb.ask(question, collection, k).await?;
    println!("{}", answer.text);
    if answer.synthesized {
        println!("\nSources:");
        for hit in &answer.sources {
            println!("  - {}", hit.metadata.source_file);
        }
    }
    Ok(())
}

/// Asks on stdin; anything but `y`/`yes` declines.
pub fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(is_yes(&line))
}

fn is_yes(answer: &str) -> bool { matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") }

fn short_name(path: &Path) -> String {
    path.file_name().map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().to_string())
}
