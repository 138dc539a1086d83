//! # Mantra Service - Compiling and Indexing Quiz Trees
//!
//! [`Mantra`] is the entry point a quiz UI (or the `mantra` command line) talks to. It owns the
//! configuration, the persisted test index and the compile job controller, and offers the few
//! operations a caller needs:
//!
//! - [`Mantra::sync`] rescans the source and destination trees and persists the merged index
//! - [`Mantra::request_compile`] starts (or joins) the background compile of one test
//! - [`Mantra::query_status`] reports index flags and job progress for one test
//! - [`Mantra::remove_orphan`] deletes the output of a test whose source is gone
//!
//! Requests run synchronously on the caller's thread; only compiles run in the background, one
//! thread per test id. Callers poll [`Mantra::query_status`] for completion.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mantra_core::{config::TomlConfigProvider, index::TestStatus, service::Mantra};
//! use std::time::Duration;
//!
//! let mantra = Mantra::from_provider(&TomlConfigProvider::in_dir("."))?;
//! let index = mantra.sync()?;
//! for entry in index.with_status(TestStatus::Creatable) {
//!     mantra.request_compile(&entry.test_id)?;
//!     mantra.wait(&entry.test_id, Duration::from_secs(60));
//!     println!("{}: {:?}", entry.test_id, mantra.query_status(&entry.test_id)?.status);
//! }
//! # Ok::<(), mantra_core::MantraError>(())
//! ```
use enumset::EnumSet;
use serde::{Deserialize, Serialize};
use std::{
    fs::remove_dir_all,
    path::{absolute, Path},
    sync::Arc,
    time::Duration,
};

use crate::{
    codec::{context::CompileContext, extract::parse_source, DocumentCompiler, ParsedDocument},
    config::{ConfigProvider, MantraConfig},
    error::MantraError,
    index::{self, IndexFlag, IndexStore, TestId, TestIndex, TestIndexEntry, TestStatus},
    jobs::{CompileRequest, CompileWorker, JobController, JobState},
};

/// Everything a poller wants to know about one test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub test_id: TestId,
    pub flags: EnumSet<IndexFlag>,
    pub status: Option<TestStatus>,
    pub state: JobState,
    pub running: bool,
    pub log_tail: Vec<String>,
    pub error: Option<MantraError>,
}

#[derive(Debug)]
pub struct Mantra {
    config: MantraConfig,
    store: Arc<IndexStore>,
    jobs: JobController,
}

impl Mantra {
    pub fn new(config: MantraConfig) -> Result<Self, MantraError> {
        Mantra::with_worker(config, Arc::new(DocumentCompiler::new()))
    }

    /// Service running `worker` for every compile job.
    pub fn with_worker(
        config: MantraConfig,
        worker: Arc<dyn CompileWorker>,
    ) -> Result<Self, MantraError> {
        config.validate()?;
        let store = Arc::new(IndexStore::new(config.index_path()));
        let jobs = JobController::new(store.clone(), worker);
        tracing::debug!(
            "mantra service: {:?} -> {:?}",
            config.src_root(),
            config.dst_root()
        );
        Ok(Mantra {
            config,
            store,
            jobs,
        })
    }

    pub fn from_provider(provider: &dyn ConfigProvider) -> Result<Self, MantraError> {
        Mantra::new(provider.load()?)
    }

    pub fn config(&self) -> &MantraConfig {
        &self.config
    }

    pub fn jobs(&self) -> &JobController {
        &self.jobs
    }

    /// Rescan both trees and persist the merged index.
    pub fn sync(&self) -> Result<TestIndex, MantraError> {
        index::sync(&self.config, &self.store)
    }

    /// The persisted index as of the last sync or job update.
    pub fn index(&self) -> TestIndex {
        self.store.load()
    }

    pub fn entry(&self, test_id: &TestId) -> Option<TestIndexEntry> {
        self.store.load().get(test_id).cloned()
    }

    /// The entry for `test_id`, syncing once when the persisted index does not know it.
    fn resolve(&self, test_id: &TestId) -> Result<TestIndexEntry, MantraError> {
        if let Some(entry) = self.entry(test_id) {
            return Ok(entry);
        }
        tracing::debug!("{test_id} not indexed, syncing");
        self.sync()?
            .get(test_id)
            .cloned()
            .ok_or_else(|| MantraError::NotFound(format!("no test with id {test_id}")))
    }

    pub fn request_compile(&self, test_id: &TestId) -> Result<CompileRequest, MantraError> {
        let entry = self.resolve(test_id)?;
        if entry.flags.contains(IndexFlag::Orphaned) {
            return Err(MantraError::NotFound(format!(
                "source of {test_id} is gone, nothing to compile"
            )));
        }
        self.jobs.request_compile(&entry)
    }

    /// Request a compile of every test that is Creatable or Updatable.
    pub fn compile_stale(&self) -> Result<Vec<CompileRequest>, MantraError> {
        let index = self.sync()?;
        index
            .iter()
            .filter(|entry| {
                matches!(
                    entry.status(),
                    Some(TestStatus::Creatable) | Some(TestStatus::Updatable)
                )
            })
            .map(|entry| self.jobs.request_compile(entry))
            .collect()
    }

    pub fn query_status(&self, test_id: &TestId) -> Result<StatusReport, MantraError> {
        let entry = self.resolve(test_id)?;
        let job = self.jobs.status(&entry, self.config.log_tail);
        Ok(StatusReport {
            test_id: entry.test_id.clone(),
            flags: entry.flags,
            status: entry.status(),
            state: job.state,
            running: job.running,
            log_tail: job.log_tail,
            error: job.error,
        })
    }

    /// Wait for the compile of `test_id`. True when it is no longer running.
    pub fn wait(&self, test_id: &TestId, timeout: Duration) -> bool {
        self.jobs.wait(test_id, timeout)
    }

    /// Delete the output directory of an orphaned test and drop it from the index. Source
    /// files are never touched.
    pub fn remove_orphan(&self, test_id: &TestId) -> Result<(), MantraError> {
        let index = self.sync()?;
        let entry = index
            .get(test_id)
            .ok_or_else(|| MantraError::NotFound(format!("no test with id {test_id}")))?;
        if !entry.flags.contains(IndexFlag::Orphaned) {
            return Err(MantraError::Custom(format!(
                "{test_id} still has a source, refusing to remove it"
            )));
        }
        let dst_root = absolute(self.config.dst_root())?;
        if entry.dst_dir.parent() != Some(dst_root.as_path()) {
            return Err(MantraError::Custom(format!(
                "{:?} is not a test directory below {dst_root:?}",
                entry.dst_dir
            )));
        }
        if let Some(job) = self.jobs.handle(test_id) {
            if job.running() {
                return Err(MantraError::Custom(format!("{test_id} is being compiled")));
            }
        }
        remove_dir_all(&entry.dst_dir)?;
        tracing::info!("removed orphaned test {test_id} at {:?}", entry.dst_dir);
        self.store.update(|index| {
            index.remove(test_id);
        })?;
        Ok(())
    }

    /// Parse one source document without writing any output.
    pub fn parse_file(&self, path: &Path) -> Result<ParsedDocument, MantraError> {
        let path = absolute(path)?;
        let ctx = CompileContext::detached(&path, &absolute(self.config.dst_root())?);
        parse_source(&ctx)
    }
}
