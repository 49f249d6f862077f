//! Stale-entry selection for the periodic cache sweep.

use std::path::Path;
use std::time::SystemTime;

use regex::Regex;
use tracing::trace;

/// Walk the cache tree once and return the virtual paths of regular
/// files that are eligible for eviction: basename not exempted by
/// `ignore`, access time older than `cutoff`.
///
/// Paths come back in walk order. The walk tolerates nothing: any IO
/// error aborts the scan and surfaces to the caller.
pub async fn stale_files(
    cache_root: &Path,
    ignore: Option<&Regex>,
    cutoff: SystemTime,
) -> std::io::Result<Vec<String>> {
    let mut stale = Vec::new();
    let mut pending = vec![cache_root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if ignore.is_some_and(|re| re.is_match(name)) {
                trace!(name, "cleaner exempting file");
                continue;
            }

            let atime = entry.metadata().await?.accessed()?;
            let path = entry.path();
            if atime < cutoff
                && let Ok(rel) = path.strip_prefix(cache_root)
                && let Some(rel) = rel.to_str()
            {
                stale.push(format!("/{rel}"));
            }
        }
    }

    Ok(stale)
}
