use sha2::{Digest, Sha256};
use std::{
    collections::BTreeMap,
    fs::{read, read_dir, read_to_string},
    path::{absolute, Path, PathBuf},
};
use walkdir::{DirEntry, WalkDir};

use crate::{
    config::MantraConfig,
    error::MantraError,
    index::{
        entry::{TestIndexEntry, MARKER_NAME, STATS_NAME},
        test_id::TestId,
    },
};

pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn file_hash(path: &Path) -> Result<String, MantraError> {
    Ok(content_hash(&read(path)?))
}

/// One source document found by [scan_sources].
#[derive(Debug, Clone, PartialEq)]
pub struct SourceCandidate {
    pub test_id: TestId,
    pub src_file: PathBuf,
    pub category: String,
    /// Content digest, or why the file could not be read.
    pub hash: Result<String, MantraError>,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<String>>()
        .join("/")
}

/// Every source document under the configured source root, in path order.
///
/// Documents must sit in a category directory below the root; files directly in the root,
/// hidden entries, files with other extensions and paths matching an ignore pattern are left
/// out. Walk errors are logged and skipped.
#[tracing::instrument(skip_all)]
pub fn scan_sources(config: &MantraConfig) -> Result<Vec<SourceCandidate>, MantraError> {
    let root = absolute(config.src_root())?;
    let ignore = config.ignore_patterns()?;
    let mut candidates = Vec::new();
    for entry in WalkDir::new(&root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e) || e.path() == root)
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("skipping unreadable source entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() || !config.accepts_extension(entry.path()) {
            continue;
        }
        let relative = entry.path().strip_prefix(&root)?;
        let relative_str = slash_path(relative);
        if ignore.iter().any(|re| re.is_match(&relative_str)) {
            tracing::debug!("ignoring {relative_str}");
            continue;
        }
        let category = relative.parent().map(slash_path).unwrap_or_default();
        if category.is_empty() {
            tracing::debug!("skipping {relative_str}: not inside a category");
            continue;
        }
        let basename = entry.file_name().to_string_lossy().into_owned();
        let src_file = entry.into_path();
        let hash = file_hash(&src_file);
        if let Err(e) = &hash {
            tracing::warn!("cannot read source {src_file:?}: {e}");
        }
        candidates.push(SourceCandidate {
            test_id: TestId::derive(&basename, &category),
            src_file,
            category,
            hash,
        });
    }
    tracing::debug!("found {} source documents", candidates.len());
    Ok(candidates)
}

/// What a destination directory says about itself.
#[derive(Debug, Clone, PartialEq)]
pub enum DstRecord {
    Marker(TestIndexEntry),
    /// A marker exists but cannot be decoded.
    Corrupt(String),
}

/// Every destination directory holding a marker, keyed by directory name.
#[tracing::instrument(skip_all)]
pub fn scan_destinations(
    dst_root: &Path,
) -> Result<BTreeMap<TestId, (PathBuf, DstRecord)>, MantraError> {
    let dst_root = absolute(dst_root)?;
    let mut records = BTreeMap::new();
    let dir = match read_dir(&dst_root) {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
        Err(e) => return Err(e.into()),
    };
    for entry in dir {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("skipping unreadable destination entry: {e}");
                continue;
            }
        };
        let path = entry.path();
        if !path.is_dir() || !path.join(MARKER_NAME).exists() {
            continue;
        }
        let Ok(test_id) = entry.file_name().to_string_lossy().parse::<TestId>() else {
            tracing::debug!("skipping {path:?}: not a test directory");
            continue;
        };
        let record = match TestIndexEntry::read_marker(&path) {
            Ok(marker) => DstRecord::Marker(marker),
            Err(e) => {
                tracing::warn!("unusable marker in {path:?}: {e}");
                DstRecord::Corrupt(e.to_string())
            }
        };
        records.insert(test_id, (path, record));
    }
    Ok(records)
}

/// Integer average of the `score` column of a test's `stats.csv`, 0 without usable rows.
pub fn read_score(dst_dir: &Path) -> i64 {
    let Ok(content) = read_to_string(dst_dir.join(STATS_NAME)) else {
        return 0;
    };
    let mut lines = content.lines();
    let column = lines
        .next()
        .and_then(|header| header.split(',').position(|name| name.trim() == "score"))
        .unwrap_or(3);
    let scores: Vec<i64> = lines
        .filter_map(|line| line.split(',').nth(column))
        .filter_map(|score| score.trim().parse::<i64>().ok())
        .collect();
    if scores.is_empty() {
        0
    } else {
        scores.iter().sum::<i64>() / scores.len() as i64
    }
}
