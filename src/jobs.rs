//! Background compilation, one job per test id.
//!
//! A job moves through [JobState::Idle] → [JobState::Starting] → [JobState::Running] →
//! [JobState::Done]. Two things keep a second compile of the same test from starting while one
//! is in flight: the controller's own job map, and the job log (`mtr.log`) inside the test's
//! destination directory, which is created with `create_new` and doubles as a lock visible to
//! other processes. Both are checked and claimed inside one critical section, so N concurrent
//! [JobController::request_compile] calls for the same id produce exactly one
//! [CompileRequest::Started].
//!
//! The worker thread owns the job log. When the compile ends, successfully or not, the index
//! entry is updated under the index lock, the log is removed (success) or renamed to `mtr.err`
//! (failure), and waiters are woken. There is no cancellation.
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::{
    any::Any,
    collections::HashMap,
    fs::{create_dir_all, read_to_string, remove_file, rename, OpenOptions},
    io::ErrorKind,
    panic::{catch_unwind, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crate::{
    codec::context::{CompileContext, JobLog},
    error::MantraError,
    index::{IndexStore, TestId, TestIndexEntry, ERR_NAME, LOG_NAME},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Idle,
    Starting,
    Running,
    Done,
}

impl JobState {
    pub fn running(&self) -> bool {
        matches!(self, JobState::Starting | JobState::Running)
    }
}

/// Outcome of asking for a compile. Neither variant is an error: joining a job already in
/// flight is the expected answer to a duplicate request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileRequest {
    Started(TestId),
    Joined(TestId),
}

impl CompileRequest {
    pub fn test_id(&self) -> &TestId {
        match self {
            CompileRequest::Started(id) | CompileRequest::Joined(id) => id,
        }
    }
}

/// The unit of work a job runs. Returns the entry as it should appear in the index afterwards.
pub trait CompileWorker: Send + Sync {
    fn compile(
        &self,
        ctx: &CompileContext,
        entry: &TestIndexEntry,
    ) -> Result<TestIndexEntry, MantraError>;
}

/// One in-flight or finished compilation.
#[derive(Debug)]
pub struct JobHandle {
    test_id: TestId,
    logfile: PathBuf,
    state: Mutex<JobState>,
    finished: Condvar,
    error: Mutex<Option<MantraError>>,
}

impl JobHandle {
    fn new(test_id: TestId, logfile: PathBuf) -> Self {
        JobHandle {
            test_id,
            logfile,
            state: Mutex::new(JobState::Starting),
            finished: Condvar::new(),
            error: Mutex::new(None),
        }
    }

    pub fn test_id(&self) -> &TestId {
        &self.test_id
    }

    pub fn logfile(&self) -> &Path {
        &self.logfile
    }

    pub fn state(&self) -> JobState {
        *self.state.lock()
    }

    pub fn running(&self) -> bool {
        self.state().running()
    }

    /// Why the job failed, once it is Done.
    pub fn last_error(&self) -> Option<MantraError> {
        self.error.lock().clone()
    }

    fn set_state(&self, state: JobState) {
        *self.state.lock() = state;
        if state == JobState::Done {
            self.finished.notify_all();
        }
    }

    /// Block until the job is Done or `timeout` elapses. Returns true when the job is Done.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while *state != JobState::Done {
            if self.finished.wait_until(&mut state, deadline).timed_out() {
                return *state == JobState::Done;
            }
        }
        true
    }
}

/// What a poller learns about the compile job of one test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    /// True while this process runs the job, or while a lock left by another process exists.
    pub running: bool,
    /// Last lines of the running job's log, or of the last failed one.
    pub log_tail: Vec<String>,
    pub error: Option<MantraError>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The last `lines` lines of `path`, empty when it cannot be read.
pub fn tail(path: &Path, lines: usize) -> Vec<String> {
    let Ok(content) = read_to_string(path) else {
        return Vec::new();
    };
    let all: Vec<&str> = content.lines().collect();
    all[all.len().saturating_sub(lines)..]
        .iter()
        .map(|line| line.to_string())
        .collect()
}

/// Starts compile jobs and tracks them by test id.
#[derive(Clone)]
pub struct JobController {
    jobs: Arc<Mutex<HashMap<TestId, Arc<JobHandle>>>>,
    store: Arc<IndexStore>,
    worker: Arc<dyn CompileWorker>,
}

impl std::fmt::Debug for JobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobController")
            .field("jobs", &self.jobs.lock().len())
            .field("store", &self.store.path())
            .finish()
    }
}

impl JobController {
    pub fn new(store: Arc<IndexStore>, worker: Arc<dyn CompileWorker>) -> Self {
        JobController {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            store,
            worker,
        }
    }

    pub fn handle(&self, test_id: &TestId) -> Option<Arc<JobHandle>> {
        self.jobs.lock().get(test_id).cloned()
    }

    /// Start compiling `entry`, or join the job already compiling it.
    #[tracing::instrument(skip_all, fields(test_id = %entry.test_id))]
    pub fn request_compile(&self, entry: &TestIndexEntry) -> Result<CompileRequest, MantraError> {
        let test_id = entry.test_id.clone();
        let mut jobs = self.jobs.lock();
        if jobs.get(&test_id).is_some_and(|job| job.running()) {
            tracing::debug!("joining running job");
            return Ok(CompileRequest::Joined(test_id));
        }

        create_dir_all(&entry.dst_dir)?;
        let logfile = entry.dst_dir.join(LOG_NAME);
        let file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&logfile)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::debug!("job log {logfile:?} exists, joining");
                return Ok(CompileRequest::Joined(test_id));
            }
            Err(e) => return Err(e.into()),
        };

        let handle = Arc::new(JobHandle::new(test_id.clone(), logfile.clone()));
        jobs.insert(test_id.clone(), handle.clone());

        let log = JobLog::from_file(&test_id, file);
        let job_entry = entry.clone();
        let store = self.store.clone();
        let worker = self.worker.clone();
        let spawned = thread::Builder::new()
            .name(format!("compile-{test_id}"))
            .spawn(move || run_job(handle, job_entry, log, store, worker));
        if let Err(e) = spawned {
            jobs.remove(&test_id);
            if let Err(e) = remove_file(&logfile) {
                tracing::warn!("cannot remove job log {logfile:?}: {e}");
            }
            return Err(e.into());
        }
        tracing::info!("compile job started");
        Ok(CompileRequest::Started(test_id))
    }

    pub fn status(&self, entry: &TestIndexEntry, tail_lines: usize) -> JobStatus {
        let handle = self.handle(&entry.test_id);
        let lock = entry.dst_dir.join(LOG_NAME);
        let state = handle.as_ref().map(|h| h.state()).unwrap_or_default();
        // A lock this process does not hold means another process is compiling
        let running = state.running() || lock.exists();
        let log_tail = if lock.exists() {
            tail(&lock, tail_lines)
        } else {
            tail(&entry.dst_dir.join(ERR_NAME), tail_lines)
        };
        JobStatus {
            state,
            running,
            log_tail,
            error: handle.and_then(|h| h.last_error()),
        }
    }

    /// Wait for the job of `test_id`. True when no job is running for it when this returns.
    pub fn wait(&self, test_id: &TestId, timeout: Duration) -> bool {
        match self.handle(test_id) {
            Some(handle) => handle.wait(timeout),
            None => true,
        }
    }

    /// Remove a job lock that no job of this process owns, e.g. one left by a crashed process.
    /// Returns false when a job of this process is still running.
    pub fn break_lock(&self, entry: &TestIndexEntry) -> Result<bool, MantraError> {
        let jobs = self.jobs.lock();
        if jobs.get(&entry.test_id).is_some_and(|job| job.running()) {
            return Ok(false);
        }
        match remove_file(entry.dst_dir.join(LOG_NAME)) {
            Ok(()) => {
                tracing::warn!("{}: removed stale job lock", entry.test_id);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }
}

/// Mark the indexed entry of a failed compile, falling back to the requested entry when the
/// index has none. The lookup happens under the store lock, so a concurrent sync is not undone.
fn record_failure(store: &IndexStore, requested: TestIndexEntry) -> Result<(), MantraError> {
    store.update(|index| {
        let mut failed = index
            .get(&requested.test_id)
            .cloned()
            .unwrap_or(requested);
        failed.mark_failed();
        index.insert(failed);
    })?;
    Ok(())
}

fn run_job(
    handle: Arc<JobHandle>,
    entry: TestIndexEntry,
    log: JobLog,
    store: Arc<IndexStore>,
    worker: Arc<dyn CompileWorker>,
) {
    handle.set_state(JobState::Running);
    log.info(format!("Compile target: {}", entry.test_id));
    log.info(format!("Source: {:?}", entry.src_file));
    log.info(format!("Destination: {:?}", entry.dst_dir));

    let ctx = CompileContext::new(&entry, log.clone());
    let outcome = catch_unwind(AssertUnwindSafe(|| worker.compile(&ctx, &entry)))
        .unwrap_or_else(|payload| {
            Err(MantraError::Custom(format!(
                "compile panicked: {}",
                panic_message(payload.as_ref())
            )))
        });
    drop(ctx);

    let failed = match outcome {
        Ok(compiled) => {
            log.info(format!("Compiled {} questions", compiled.numq));
            if let Err(e) = store.update(|index| {
                index.insert(compiled);
            }) {
                log.warn(format!("Cannot update index: {e}"));
            }
            None
        }
        Err(e) => {
            log.error(format!("Compile failed: {e}"));
            if let Err(e) = record_failure(&store, entry) {
                log.warn(format!("Cannot update index: {e}"));
            }
            Some(e)
        }
    };
    log.info("done!");
    log.flush();
    drop(log);

    let logfile = handle.logfile().to_path_buf();
    let err_file = logfile.with_file_name(ERR_NAME);
    let released = if failed.is_some() {
        rename(&logfile, &err_file)
    } else {
        remove_file(&logfile).and_then(|()| match remove_file(&err_file) {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        })
    };
    if let Err(e) = released {
        tracing::error!(job = %handle.test_id(), "cannot release job lock {logfile:?}: {e}");
    }

    *handle.error.lock() = failed;
    handle.set_state(JobState::Done);
}
