use anyhow::{bail, Context, Result};
use indicatif::HumanBytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};

use plugin_mirror::utils::safe_component;
use plugin_mirror::{
    hashing, planner, Destination, Downloader, Prefetcher, RequestOptions, TransferConfig,
    TransferTarget,
};

pub async fn run_fetch(
    config: TransferConfig,
    url: String,
    destination: Destination,
    overwrite: bool,
    headers: Vec<(String, String)>,
    params: Vec<(String, String)>,
) -> Result<()> {
    let mut options = RequestOptions::from_config(&config);
    options.headers = headers;
    options.params = params;
    let target = TransferTarget::new(url.clone(), destination).with_options(options);

    let downloader = Downloader::new(config)?;
    let result = downloader
        .download(&target, overwrite)
        .await
        .with_context(|| format!("Failed to download {}", url))?;

    match result.local_path {
        Some(path) => {
            let size = fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            println!("{} -> {} ({})", result.final_url, path.display(), HumanBytes(size));
        }
        None => println!("{} skipped, file already present", result.final_url),
    }
    Ok(())
}

/// Parse a tasks file: one `url|file_name` per line, blank lines ignored.
pub async fn read_tasks(input: &Path) -> Result<Vec<(String, Option<String>)>> {
    let file = fs::File::open(input)
        .await
        .with_context(|| format!("Failed to open tasks file: {:?}", input))?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();
    let mut items = vec![];
    while let Some(line) = lines.next_line().await? {
        let raw = line.trim();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        let mut parts = raw.splitn(2, '|');
        let url = parts.next().unwrap_or_default().trim().to_string();
        let name = parts
            .next()
            .map(|n| n.trim().to_string())
            .filter(|s| !s.is_empty());
        if !url.is_empty() {
            items.push((url, name));
        }
    }
    Ok(items)
}

pub async fn run_prefetch(config: TransferConfig, tasks_file: PathBuf, dir: PathBuf) -> Result<()> {
    let items = read_tasks(&tasks_file).await?;
    if items.is_empty() {
        bail!("No entries in {:?}", tasks_file);
    }

    let options = RequestOptions::from_config(&config);
    let mut targets = Vec::with_capacity(items.len());
    for (url, name) in items {
        let destination = match name {
            Some(name) => Destination::File(dir.join(safe_component(&name)?)),
            None => Destination::Directory {
                dir: dir.clone(),
                default_name: "unnamed".to_string(),
            },
        };
        targets.push(TransferTarget::new(url, destination).with_options(options.clone()));
    }

    let prefetcher = Prefetcher::new(Arc::new(Downloader::new(config)?));
    let reports = prefetcher.run(targets).await;

    let failed = reports.iter().filter(|r| r.result.is_err()).count();
    for report in &reports {
        match &report.result {
            Ok(done) if done.is_skipped() => println!("{:<10} {}", "Skipped", report.url),
            Ok(_) => println!("{:<10} {}", "Completed", report.url),
            Err(e) => println!("{:<10} {} ({})", "Failed", report.url, e),
        }
    }
    if failed > 0 {
        bail!("{} of {} prefetches failed", failed, reports.len());
    }
    Ok(())
}

pub fn run_plan(size: u64, segment_size: u64) {
    let segments = planner::plan(size, segment_size);
    println!("{:<8} {:<15} {:<15} {:<30}", "Segment", "Start", "End", "Range");
    println!("{:-<8} {:-<15} {:-<15} {:-<30}", "", "", "", "");
    for segment in segments {
        println!(
            "{:<8} {:<15} {:<15} {:<30}",
            segment.index,
            segment.start,
            segment.end,
            segment.range_header()
        );
    }
}

pub async fn run_digest(file: PathBuf) -> Result<()> {
    let hash = hashing::calculate_hash(&file)
        .await
        .with_context(|| format!("Failed to hash {:?}", file))?;
    println!("{}  {}", hash, file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn tasks_file_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("prefetch.txt");
        std::fs::write(
            &path,
            "https://host/a.zip|a.zip\n\n# comment\nhttps://host/b.jar\nhttps://host/c.zip| \n",
        )
        .unwrap();

        let items = read_tasks(&path).await.unwrap();
        assert_eq!(
            items,
            vec![
                ("https://host/a.zip".to_string(), Some("a.zip".to_string())),
                ("https://host/b.jar".to_string(), None),
                ("https://host/c.zip".to_string(), None),
            ]
        );
    }
}
