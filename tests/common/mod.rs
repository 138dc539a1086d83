//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use mantra_core::{config::MantraConfig, service::Mantra};
use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tempfile::TempDir;

/// The single question document of the classic `net/ospf.md` scenario.
#[allow(dead_code)]
pub const OSPF_QUIZ: &str = "## Q1

Which letter?

(A) x
(B) y

answer: b
";

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Write `content` to `path`, creating missing parent directories.
#[allow(dead_code)]
pub fn write_file(path: &Path, content: impl AsRef<[u8]>) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// Move the modification time of `path` `secs` seconds into the future, so a change is seen
/// even on filesystems with coarse timestamps.
#[allow(dead_code)]
pub fn touch_later(path: &Path, secs: u64) {
    let later = SystemTime::now() + Duration::from_secs(secs);
    filetime::set_file_mtime(path, filetime::FileTime::from_system_time(later)).unwrap();
}

/// A quiz tree inside a temp dir: sources under `<root>/docs`, outputs under `<root>/out`.
pub struct QuizTree {
    pub dir: TempDir,
    pub config: MantraConfig,
}

#[allow(dead_code)]
impl QuizTree {
    pub fn new(docs: &[(&str, &str)]) -> Self {
        init_logging();
        let dir = TempDir::new().unwrap();
        let config = QuizTree::config_in(dir.path());
        std::fs::create_dir_all(config.src_root()).unwrap();
        for (relative, content) in docs {
            write_file(&config.src_root().join(relative), content);
        }
        QuizTree { dir, config }
    }

    /// Config for a tree rooted at `root`, with relative source and destination dirs.
    pub fn config_in(root: &Path) -> MantraConfig {
        MantraConfig {
            root: root.to_path_buf(),
            ..MantraConfig::with_dirs("docs", "out")
        }
    }

    pub fn src(&self, relative: &str) -> PathBuf {
        self.config.src_root().join(relative)
    }

    pub fn mantra(&self) -> Mantra {
        Mantra::new(self.config.clone()).unwrap()
    }
}
