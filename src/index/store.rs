use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{create_dir_all, read_to_string},
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

use crate::{
    error::MantraError,
    index::{
        entry::{IndexFlag, TestIndexEntry, TestStatus},
        test_id::TestId,
    },
};

/// Replace `path` with `bytes` in one rename, so readers never see a partial file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), MantraError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// Every known test, keyed by test id.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestIndex {
    entries: BTreeMap<TestId, TestIndexEntry>,
}

impl TestIndex {
    pub fn new() -> Self {
        TestIndex::default()
    }

    pub fn get(&self, test_id: &TestId) -> Option<&TestIndexEntry> {
        self.entries.get(test_id)
    }

    pub fn insert(&mut self, entry: TestIndexEntry) -> Option<TestIndexEntry> {
        self.entries.insert(entry.test_id.clone(), entry)
    }

    pub fn remove(&mut self, test_id: &TestId) -> Option<TestIndexEntry> {
        self.entries.remove(test_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestIndexEntry> {
        self.entries.values()
    }

    pub fn with_status(&self, status: TestStatus) -> impl Iterator<Item = &TestIndexEntry> {
        self.iter().filter(move |e| e.status() == Some(status))
    }

    pub fn with_flag(&self, flag: IndexFlag) -> impl Iterator<Item = &TestIndexEntry> {
        self.iter().filter(move |e| e.flags.contains(flag))
    }

    /// Entries grouped by category, in category then test id order.
    pub fn by_category(&self) -> BTreeMap<&str, Vec<&TestIndexEntry>> {
        let mut grouped: BTreeMap<&str, Vec<&TestIndexEntry>> = BTreeMap::new();
        for entry in self.iter() {
            grouped.entry(entry.category.as_str()).or_default().push(entry);
        }
        grouped
    }

    pub fn from_json(json: &str) -> Result<TestIndex, MantraError> {
        serde_json::from_str(json).map_err(|e| MantraError::IndexCorruption(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, MantraError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl FromIterator<TestIndexEntry> for TestIndex {
    fn from_iter<I: IntoIterator<Item = TestIndexEntry>>(iter: I) -> Self {
        let mut index = TestIndex::new();
        for entry in iter {
            index.insert(entry);
        }
        index
    }
}

/// The index file at the destination root, plus the lock serializing its writers.
#[derive(Debug)]
pub struct IndexStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl IndexStore {
    pub fn new(path: PathBuf) -> Self {
        IndexStore {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the index, failing on a missing or malformed file.
    pub fn load_strict(&self) -> Result<TestIndex, MantraError> {
        let content = read_to_string(&self.path)?;
        TestIndex::from_json(&content)
    }

    /// Read the index. A missing or corrupt file is an empty index that needs a resync.
    pub fn load(&self) -> TestIndex {
        match self.load_strict() {
            Ok(index) => index,
            Err(MantraError::NotFound(_)) => {
                tracing::debug!("no index at {:?}, starting empty", self.path);
                TestIndex::new()
            }
            Err(e) => {
                tracing::warn!("index at {:?} unusable, resync needed: {e}", self.path);
                TestIndex::new()
            }
        }
    }

    pub fn save(&self, index: &TestIndex) -> Result<(), MantraError> {
        let _guard = self.lock.lock();
        write_atomic(&self.path, index.to_json()?.as_bytes())
    }

    /// Read-modify-write under the store lock.
    pub fn update<F>(&self, f: F) -> Result<TestIndex, MantraError>
    where
        F: FnOnce(&mut TestIndex),
    {
        let _guard = self.lock.lock();
        let mut index = self.load();
        f(&mut index);
        write_atomic(&self.path, index.to_json()?.as_bytes())?;
        Ok(index)
    }

    /// Build a fresh index under the store lock and replace the file with it.
    pub fn rebuild<F>(&self, build: F) -> Result<TestIndex, MantraError>
    where
        F: FnOnce() -> Result<TestIndex, MantraError>,
    {
        let _guard = self.lock.lock();
        let index = build()?;
        write_atomic(&self.path, index.to_json()?.as_bytes())?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enumset::EnumSet;

    fn entry(basename: &str, category: &str, flags: EnumSet<IndexFlag>) -> TestIndexEntry {
        TestIndexEntry {
            test_id: TestId::derive(basename, category),
            category: category.to_string(),
            flags,
            ..Default::default()
        }
    }

    #[test]
    fn missing_index_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path().join("mantra.idx"));
        assert!(store.load().is_empty());
        assert!(matches!(store.load_strict(), Err(MantraError::NotFound(_))));
    }

    #[test]
    fn corrupt_index_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mantra.idx");
        std::fs::write(&path, "[1, 2").unwrap();
        let store = IndexStore::new(path);
        assert!(store.load().is_empty());
        assert!(matches!(
            store.load_strict(),
            Err(MantraError::IndexCorruption(_))
        ));
    }

    #[test]
    fn save_load_and_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path().join("out/mantra.idx"));
        let index: TestIndex = vec![
            entry("a.md", "net", IndexFlag::Playable.into()),
            entry("b.md", "net", IndexFlag::Creatable.into()),
            entry("c.md", "os", IndexFlag::Orphaned.into()),
        ]
        .into_iter()
        .collect();
        store.save(&index).unwrap();
        assert_eq!(store.load(), index);

        let updated = store
            .update(|idx| {
                idx.remove(&TestId::derive("c.md", "os"));
            })
            .unwrap();
        assert_eq!(updated.len(), 2);
        assert_eq!(store.load().len(), 2);
        assert_eq!(updated.by_category().get("net").map(Vec::len), Some(2));
        assert_eq!(updated.with_status(TestStatus::Playable).count(), 1);
    }
}
