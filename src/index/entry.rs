use enumset::{EnumSet, EnumSetType};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    fs::read_to_string,
    path::{Path, PathBuf},
};

use crate::{
    codec::question::question_file_name,
    error::MantraError,
    index::{store::write_atomic, test_id::TestId},
};

/// Per test marker inside its destination directory.
pub const MARKER_NAME: &str = "mtr.idx";
/// Per test image manifest.
pub const MANIFEST_NAME: &str = "img.idx";
/// Quiz level metadata and document tags.
pub const QUIZ_NAME: &str = "quiz.json";
/// Front matter body.
pub const LEAD_NAME: &str = "lead.md";
/// Score history written by the quiz UI.
pub const STATS_NAME: &str = "stats.csv";
/// Job log of a running compile. Its existence is the running-job lock.
pub const LOG_NAME: &str = "mtr.log";
/// Job log of the last failed compile.
pub const ERR_NAME: &str = "mtr.err";

#[derive(EnumSetType, Debug, Serialize, Deserialize)]
#[enumset(serialize_repr = "list")]
pub enum IndexFlag {
    /// No compiled output exists yet.
    Creatable,
    /// Source or a referenced image changed since the last compile.
    Updatable,
    /// Compiled output is present and non-empty.
    Playable,
    /// Compiled output exists but its source is gone.
    Orphaned,
    /// The source cannot be read, or its last compile failed.
    SrcError,
    /// The destination disagrees with the source scan.
    DstError,
}

/// The one status shown for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestStatus {
    Creatable,
    Updatable,
    Playable,
    Orphaned,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TestStatus::Creatable => "creatable",
            TestStatus::Updatable => "updatable",
            TestStatus::Playable => "playable",
            TestStatus::Orphaned => "orphaned",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestIndexEntry {
    pub test_id: TestId,
    pub src_file: PathBuf,
    pub src_hash: String,
    pub category: String,
    pub dst_dir: PathBuf,
    pub numq: usize,
    pub score: i64,
    pub grade: i64,
    pub flags: EnumSet<IndexFlag>,
}

impl Default for TestIndexEntry {
    fn default() -> Self {
        TestIndexEntry {
            test_id: TestId::derive("", ""),
            src_file: PathBuf::new(),
            src_hash: String::new(),
            category: String::new(),
            dst_dir: PathBuf::new(),
            numq: 0,
            score: 0,
            grade: 0,
            flags: EnumSet::empty(),
        }
    }
}

impl TestIndexEntry {
    pub fn new(test_id: TestId, src_file: PathBuf, category: String, dst_dir: PathBuf) -> Self {
        TestIndexEntry {
            test_id,
            src_file,
            category,
            dst_dir,
            ..Default::default()
        }
    }

    /// Primary status. Orphaned overrides everything, then Creatable, Updatable and Playable in
    /// that order. None means the entry carries error flags only.
    pub fn status(&self) -> Option<TestStatus> {
        if self.flags.contains(IndexFlag::Orphaned) {
            Some(TestStatus::Orphaned)
        } else if self.flags.contains(IndexFlag::Creatable) {
            Some(TestStatus::Creatable)
        } else if self.flags.contains(IndexFlag::Updatable) {
            Some(TestStatus::Updatable)
        } else if self.flags.contains(IndexFlag::Playable) {
            Some(TestStatus::Playable)
        } else {
            None
        }
    }

    /// Flag the entry after a failed compile: whatever output exists is not trusted to play, and
    /// the test needs a rerun.
    pub fn mark_failed(&mut self) {
        self.flags.remove(IndexFlag::Playable);
        self.flags |= IndexFlag::SrcError | IndexFlag::Updatable;
    }

    pub fn has_errors(&self) -> bool {
        !(self.flags & (IndexFlag::SrcError | IndexFlag::DstError)).is_empty()
    }

    /// Output files expected for `numq` compiled questions.
    pub fn question_files(&self) -> impl Iterator<Item = PathBuf> + '_ {
        (0..self.numq).map(|nr| self.dst_dir.join(question_file_name(nr)))
    }

    pub fn marker_path(&self) -> PathBuf {
        self.dst_dir.join(MARKER_NAME)
    }

    /// Read the marker of the test compiled into `dst_dir`.
    pub fn read_marker(dst_dir: &Path) -> Result<TestIndexEntry, MantraError> {
        let path = dst_dir.join(MARKER_NAME);
        let content = read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| MantraError::IndexCorruption(format!("{path:?}: {e}")))
    }

    /// Write this entry as the marker of its destination directory. Flags describe the state of
    /// a sync and are not persisted in the marker.
    pub fn write_marker(&self) -> Result<(), MantraError> {
        let mut marker = self.clone();
        marker.flags = EnumSet::empty();
        write_atomic(&self.marker_path(), serde_json::to_string_pretty(&marker)?.as_bytes())
    }
}
