//! The test index: which source documents exist, what has been compiled from them, and how
//! the two relate.
//!
//! A sync walks both trees and merges them:
//!
//! - every source document becomes an entry keyed by its [TestId];
//! - a source without a destination marker is [IndexFlag::Creatable];
//! - a marker naming a different source path than the one scanned gets [IndexFlag::DstError] and
//!   [IndexFlag::Updatable]. The entry is never silently rebound to the new path; a recompile
//!   rewrites the marker;
//! - a content hash that differs from the one recorded at compile time, or an image in the
//!   per-test manifest whose source is newer than its copy, makes the entry
//!   [IndexFlag::Updatable];
//! - an entry is [IndexFlag::Playable] only when every `qNNN.json` its marker promises exists and
//!   there is at least one of them; otherwise it is Creatable;
//! - unreadable sources add [IndexFlag::SrcError]. A failed last compile (an `mtr.err` log) also
//!   withdraws Playable and asks for a rerun with [IndexFlag::Updatable];
//! - markers without a source become [IndexFlag::Orphaned].
//!
//! Flags are recomputed from the filesystem on every sync, so two syncs with nothing changed in
//! between produce the same index.
pub mod entry;
pub mod scan;
pub mod store;
pub mod test_id;

use enumset::EnumSet;
use std::path::{absolute, PathBuf};

use crate::{
    assets::read_manifest,
    config::MantraConfig,
    error::MantraError,
    index::scan::{read_score, scan_destinations, scan_sources, DstRecord, SourceCandidate},
};

pub use entry::{IndexFlag, TestIndexEntry, TestStatus, ERR_NAME, LOG_NAME};
pub use store::{IndexStore, TestIndex};
pub use test_id::TestId;

fn merge_source(
    candidate: SourceCandidate,
    dst_dir: PathBuf,
    record: Option<DstRecord>,
) -> TestIndexEntry {
    let SourceCandidate {
        test_id,
        src_file,
        category,
        hash,
    } = candidate;

    let mut entry = match record {
        None => {
            let mut entry = TestIndexEntry::new(test_id, src_file, category, dst_dir.clone());
            entry.src_hash = hash.as_ref().cloned().unwrap_or_default();
            entry.flags = IndexFlag::Creatable.into();
            entry
        }
        Some(DstRecord::Corrupt(_)) => {
            let mut entry = TestIndexEntry::new(test_id, src_file, category, dst_dir.clone());
            entry.flags = IndexFlag::DstError | IndexFlag::Updatable;
            entry
        }
        Some(DstRecord::Marker(mut entry)) => {
            entry.flags = EnumSet::empty();
            if entry.src_file != src_file || entry.test_id != test_id {
                tracing::warn!(
                    "{test_id}: compiled from {:?}, source is now {src_file:?}",
                    entry.src_file
                );
                entry.flags |= IndexFlag::DstError | IndexFlag::Updatable;
            }
            entry.test_id = test_id;
            entry.src_file = src_file;
            entry.category = category;
            entry.dst_dir = dst_dir.clone();

            if matches!(&hash, Ok(current) if *current != entry.src_hash) {
                entry.flags |= IndexFlag::Updatable;
            }
            if read_manifest(&dst_dir).iter().any(|image| image.is_stale()) {
                entry.flags |= IndexFlag::Updatable;
            }
            if entry.numq > 0 && entry.question_files().all(|path| path.is_file()) {
                entry.flags |= IndexFlag::Playable;
            } else {
                entry.flags |= IndexFlag::Creatable;
            }
            entry
        }
    };

    if dst_dir.join(ERR_NAME).exists() {
        entry.mark_failed();
    }
    if hash.is_err() {
        entry.flags |= IndexFlag::SrcError;
    }
    entry.score = read_score(&dst_dir);
    entry
}

fn merge_orphan(test_id: TestId, dst_dir: PathBuf, record: DstRecord) -> TestIndexEntry {
    let mut entry = match record {
        DstRecord::Marker(mut entry) => {
            entry.flags = IndexFlag::Orphaned.into();
            if entry.test_id != test_id {
                entry.flags |= IndexFlag::DstError;
            }
            entry
        }
        DstRecord::Corrupt(_) => TestIndexEntry {
            flags: IndexFlag::Orphaned | IndexFlag::DstError,
            ..Default::default()
        },
    };
    entry.test_id = test_id;
    entry.score = read_score(&dst_dir);
    entry.dst_dir = dst_dir;
    entry
}

/// Merge a fresh scan of both trees into an index. Nothing is written.
#[tracing::instrument(skip_all)]
pub fn build_index(config: &MantraConfig) -> Result<TestIndex, MantraError> {
    let dst_root = absolute(config.dst_root())?;
    let mut destinations = scan_destinations(&dst_root)?;
    let mut index = TestIndex::new();
    for candidate in scan_sources(config)? {
        let dst_dir = dst_root.join(candidate.test_id.as_str());
        let record = destinations
            .remove(&candidate.test_id)
            .map(|(_, record)| record);
        let entry = merge_source(candidate, dst_dir, record);
        if let Some(previous) = index.insert(entry) {
            tracing::warn!(
                "test id {} shared by {:?} and another source",
                previous.test_id,
                previous.src_file
            );
        }
    }
    for (test_id, (dst_dir, record)) in destinations {
        index.insert(merge_orphan(test_id, dst_dir, record));
    }
    tracing::info!(
        "index: {} tests, {} playable, {} to compile, {} orphaned",
        index.len(),
        index.with_status(TestStatus::Playable).count(),
        index.with_status(TestStatus::Creatable).count()
            + index.with_status(TestStatus::Updatable).count(),
        index.with_status(TestStatus::Orphaned).count(),
    );
    Ok(index)
}

/// Rebuild the index and atomically replace the persisted copy.
pub fn sync(config: &MantraConfig, store: &IndexStore) -> Result<TestIndex, MantraError> {
    store.rebuild(|| build_index(config))
}
