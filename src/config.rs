//! Runtime settings for the compiler and the index.
//!
//! Settings live in a `mantra.toml` file next to the directory trees they describe:
//!
//! ```toml
//! root = "/srv/mantra"
//! src_dir = "docs"          # categories are subdirectories of this one
//! dst_dir = "mantra/output" # one subdirectory per compiled test
//! extensions = ["md", "pd", "markdown"]
//! ignore = ["(^|/)drafts/"]
//! ```
//!
//! Every field is optional. Relative `src_dir`/`dst_dir` values resolve against `root`.
use crate::error::MantraError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    fs::{create_dir_all, read_dir, read_to_string, write},
    path::{Path, PathBuf},
};

pub const CONFIG_NAME: &str = "mantra.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MantraConfig {
    /// Directory both trees hang off of.
    pub root: PathBuf,
    /// Source tree, holding one subdirectory per category.
    pub src_dir: PathBuf,
    /// Destination tree, holding one subdirectory per test id.
    pub dst_dir: PathBuf,
    /// File extensions (without the dot) recognized as quiz sources.
    pub extensions: Vec<String>,
    /// Regular expressions matched against source paths relative to `src_dir`.
    pub ignore: Vec<String>,
    /// File name of the persisted index inside `dst_dir`.
    pub index_name: String,
    /// Number of job log lines returned by a status query.
    pub log_tail: usize,
}

impl Default for MantraConfig {
    fn default() -> Self {
        MantraConfig {
            root: PathBuf::from("."),
            src_dir: PathBuf::from("docs"),
            dst_dir: PathBuf::from("mantra/output"),
            extensions: vec!["md".to_string(), "pd".to_string(), "markdown".to_string()],
            ignore: Vec::new(),
            index_name: "mantra.idx".to_string(),
            log_tail: 20,
        }
    }
}

impl MantraConfig {
    /// Settings with both trees rooted at explicit paths.
    pub fn with_dirs<S: AsRef<Path>, D: AsRef<Path>>(src_dir: S, dst_dir: D) -> Self {
        MantraConfig {
            src_dir: src_dir.as_ref().to_path_buf(),
            dst_dir: dst_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn src_root(&self) -> PathBuf {
        self.root.join(&self.src_dir)
    }

    pub fn dst_root(&self) -> PathBuf {
        self.root.join(&self.dst_dir)
    }

    pub fn index_path(&self) -> PathBuf {
        self.dst_root().join(&self.index_name)
    }

    pub fn accepts_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    pub fn ignore_patterns(&self) -> Result<Vec<Regex>, MantraError> {
        self.ignore
            .iter()
            .map(|pattern| Regex::new(pattern).map_err(MantraError::from))
            .collect()
    }

    /// Check the source tree is readable and make sure the destination tree exists.
    pub fn validate(&self) -> Result<(), MantraError> {
        let src_root = self.src_root();
        if let Err(e) = read_dir(&src_root) {
            return Err(MantraError::Config(format!(
                "cannot read source dir {src_root:?}: {e}"
            )));
        }
        self.ignore_patterns()?;
        let dst_root = self.dst_root();
        create_dir_all(&dst_root).map_err(|e| {
            MantraError::Config(format!("cannot read/create destination dir {dst_root:?}: {e}"))
        })?;
        Ok(())
    }
}

pub trait ConfigProvider: Send + Sync {
    fn load(&self) -> Result<MantraConfig, MantraError>;
    fn store(&self, config: &MantraConfig) -> Result<(), MantraError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }

    /// Provider for `mantra.toml` inside `dir`.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        TomlConfigProvider::new(dir.as_ref().join(CONFIG_NAME))
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn load(&self) -> Result<MantraConfig, MantraError> {
        tracing::debug!("Attempting to read config from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            let mut config = MantraConfig::default();
            if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                config.root = dir.to_path_buf();
            }
            return Ok(config);
        }
        let content = read_to_string(&self.path)?;
        let mut config: MantraConfig = toml::from_str(&content)
            .map_err(|e| MantraError::Config(format!("invalid {:?}: {e}", self.path)))?;
        if config.root.is_relative() {
            if let Some(dir) = self.path.parent() {
                config.root = dir.join(&config.root);
            }
        }
        Ok(config)
    }

    fn store(&self, config: &MantraConfig) -> Result<(), MantraError> {
        tracing::debug!("Attempting to write config to: {:?}", &self.path);
        let toml_string = toml::to_string(config)?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults_rooted_at_its_dir() {
        let dir = tempdir().unwrap();
        let config = TomlConfigProvider::in_dir(dir.path()).load().unwrap();
        assert_eq!(config.root, dir.path());
        assert_eq!(config.src_root(), dir.path().join("docs"));
        assert_eq!(config.index_path(), dir.path().join("mantra/output/mantra.idx"));
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_NAME),
            "src_dir = \"quizzes\"\nextensions = [\"md\"]\n",
        )
        .unwrap();
        let config = TomlConfigProvider::in_dir(dir.path()).load().unwrap();
        assert_eq!(config.src_dir, PathBuf::from("quizzes"));
        assert_eq!(config.extensions, vec!["md".to_string()]);
        assert_eq!(config.index_name, "mantra.idx");
        assert!(config.accepts_extension(Path::new("a/b.MD")));
        assert!(!config.accepts_extension(Path::new("a/b.pd")));
    }

    #[test]
    fn store_then_load() {
        let dir = tempdir().unwrap();
        let provider = TomlConfigProvider::in_dir(dir.path());
        let mut config = MantraConfig::with_dirs("src", "dst");
        config.root = dir.path().to_path_buf();
        config.ignore = vec!["draft".to_string()];
        provider.store(&config).unwrap();
        assert_eq!(provider.load().unwrap(), config);
    }

    #[test]
    fn invalid_ignore_pattern_fails_validation() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        let mut config = MantraConfig::with_dirs(dir.path().join("src"), dir.path().join("dst"));
        config.ignore = vec!["(".to_string()];
        assert!(matches!(config.validate(), Err(MantraError::Config(_))));
    }

    #[test]
    fn validate_creates_destination() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        let config = MantraConfig::with_dirs(dir.path().join("src"), dir.path().join("out/dst"));
        config.validate().unwrap();
        assert!(dir.path().join("out/dst").is_dir());
    }
}
