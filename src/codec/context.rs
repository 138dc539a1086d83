use parking_lot::Mutex;
use std::{
    fmt::Display,
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    error::MantraError,
    index::{entry::TestIndexEntry, test_id::TestId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Progress sink owned by one compile job.
///
/// Every line goes to `tracing` tagged with the job's test id and, when the job has a log file,
/// is appended to it as `HH:MM:SS LEVEL message`, the time being UTC. Clones share the same
/// file.
#[derive(Debug, Clone)]
pub struct JobLog {
    job: String,
    sink: Option<Arc<Mutex<File>>>,
}

/// Time of day in UTC as `HH:MM:SS`, the timestamp of every job log line.
fn clock() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
        % 86_400;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

impl JobLog {
    /// A log that only reaches `tracing`.
    pub fn discard<S: Display>(job: S) -> Self {
        JobLog {
            job: job.to_string(),
            sink: None,
        }
    }

    pub fn from_file<S: Display>(job: S, file: File) -> Self {
        JobLog {
            job: job.to_string(),
            sink: Some(Arc::new(Mutex::new(file))),
        }
    }

    /// Open `path` for appending, creating it when missing.
    pub fn append<S: Display>(job: S, path: &Path) -> Result<Self, MantraError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(JobLog::from_file(job, file))
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn log(&self, level: LogLevel, message: impl Display) {
        match level {
            LogLevel::Debug => tracing::debug!(job = %self.job, "{message}"),
            LogLevel::Info => tracing::info!(job = %self.job, "{message}"),
            LogLevel::Warn => tracing::warn!(job = %self.job, "{message}"),
            LogLevel::Error => tracing::error!(job = %self.job, "{message}"),
        }
        if let Some(sink) = &self.sink {
            let mut file = sink.lock();
            if let Err(e) = writeln!(file, "{} {} {message}", clock(), level.as_str()) {
                tracing::warn!(job = %self.job, "cannot write job log: {e}");
            }
        }
    }

    pub fn debug(&self, message: impl Display) {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&self, message: impl Display) {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: impl Display) {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: impl Display) {
        self.log(LogLevel::Error, message)
    }

    pub fn flush(&self) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.lock().flush() {
                tracing::warn!(job = %self.job, "cannot flush job log: {e}");
            }
        }
    }
}

/// Everything one compilation needs to know, passed explicitly through every extraction call.
#[derive(Debug, Clone)]
pub struct CompileContext {
    pub test_id: TestId,
    pub src_file: PathBuf,
    pub dst_dir: PathBuf,
    pub log: JobLog,
}

impl CompileContext {
    pub fn new(entry: &TestIndexEntry, log: JobLog) -> Self {
        CompileContext {
            test_id: entry.test_id.clone(),
            src_file: entry.src_file.clone(),
            dst_dir: entry.dst_dir.clone(),
            log,
        }
    }

    /// Context for parsing a single file outside any index, e.g. from the command line.
    pub fn detached(src_file: &Path, dst_dir: &Path) -> Self {
        let category = src_file
            .parent()
            .and_then(|p| p.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let basename = src_file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let test_id = TestId::derive(&basename, &category);
        CompileContext {
            log: JobLog::discard(&test_id),
            dst_dir: dst_dir.join(test_id.as_str()),
            test_id,
            src_file: src_file.to_path_buf(),
        }
    }

    /// Directory image references in the source document resolve against.
    pub fn src_dir(&self) -> &Path {
        self.src_file.parent().unwrap_or_else(|| Path::new("."))
    }
}
