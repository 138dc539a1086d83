//! Shared test utilities for compiler and index testing

use crate::config::MantraConfig;
use std::path::{Path, PathBuf};

/// The single question document most tests start from.
pub const OSPF_QUIZ: &str = "## Q1\n\nWhich letter?\n\n(A) x\n(B) y\n\nanswer: b\n";

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Write `content` to `path`, creating missing parent directories.
pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// Config with a `docs` source tree and an `out` destination tree under `root`. Each
/// `(relative path, content)` pair is written into the source tree.
pub fn quiz_tree(root: &Path, docs: &[(&str, &str)]) -> MantraConfig {
    init_logging();
    let src: PathBuf = root.join("docs");
    std::fs::create_dir_all(&src).unwrap();
    for (relative, content) in docs {
        write_file(&src.join(relative), content);
    }
    let config = MantraConfig::with_dirs(src, root.join("out"));
    config.validate().unwrap();
    config
}
