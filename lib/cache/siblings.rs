//! Sibling enumeration: which files to cache alongside a triggered one.

use std::path::Path;

use regex::Regex;

use crate::io;

/// Files in an album are conventionally named in play order, so the
/// lexical successors of a playing track are the tracks about to play.
///
/// Lists the source directory containing `path`, keeps basenames that
/// pass `filter`, sorts them, and returns `path` itself plus the next
/// `count` entries as virtual paths. Returns an empty list when `path`'s
/// basename is not present in the listing (e.g. it vanished from the
/// source between the trigger and the scan).
pub async fn select(
    source_root: &Path,
    path: &str,
    filter: &Regex,
    count: usize,
) -> std::io::Result<Vec<String>> {
    let vdir = io::parent(path);
    let dir = io::physical(source_root, vdir);

    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if let Ok(name) = entry.file_name().into_string()
            && filter.is_match(&name)
        {
            names.push(name);
        }
    }
    names.sort_unstable();

    let Some(start) = names.iter().position(|n| n == io::basename(path)) else {
        return Ok(Vec::new());
    };

    Ok(names
        .into_iter()
        .skip(start)
        .take(count + 1)
        .map(|name| io::join(vdir, &name))
        .collect())
}
