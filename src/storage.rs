use crate::bundle::BundleMap;
use anyhow::Context;
use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// A persistent store for named state bundles.
///
/// The core tolerates failure in both directions: a failed load yields an
/// empty bundle map, a failed save is logged and the dispatch loop keeps
/// running. Implementations are only ever called from the dispatch thread.
pub trait PersistentStorage: Send + 'static {
    /// Loads all named bundles. Returns an empty map on first run.
    fn load_bundles(&mut self) -> anyhow::Result<BundleMap>;

    /// Saves all named bundles, replacing the previous snapshot.
    fn save_bundles(&mut self, bundles: &BundleMap) -> anyhow::Result<()>;
}

/// File-backed storage keeping the whole bundle map as one JSON document.
///
/// Saves go through a sibling temp file followed by a rename, so a crash
/// mid-save leaves the previous snapshot intact.
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PersistentStorage for JsonFileStorage {
    fn load_bundles(&mut self) -> anyhow::Result<BundleMap> {
        if !self.path.exists() {
            return Ok(BundleMap::new());
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let bundles = serde_json::from_str(&raw)
            .with_context(|| format!("failed to decode {}", self.path.display()))?;
        Ok(bundles)
    }

    fn save_bundles(&mut self, bundles: &BundleMap) -> anyhow::Result<()> {
        let encoded = serde_json::to_string_pretty(bundles).context("failed to encode bundles")?;

        let mut tmp = self.path.clone();
        tmp.set_extension("tmp");
        fs::write(&tmp, encoded).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// In-memory storage. Clones share the same backing map, which makes it
/// possible to relaunch an application against the state a previous
/// instance saved; mainly useful in tests and demos.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    bundles: Arc<Mutex<BundleMap>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of the currently stored bundles.
    pub fn snapshot(&self) -> BundleMap {
        self.bundles.lock().clone()
    }
}

impl PersistentStorage for MemoryStorage {
    fn load_bundles(&mut self) -> anyhow::Result<BundleMap> {
        Ok(self.bundles.lock().clone())
    }

    fn save_bundles(&mut self, bundles: &BundleMap) -> anyhow::Result<()> {
        *self.bundles.lock() = bundles.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::Bundle;

    #[test]
    fn json_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut storage = JsonFileStorage::new(&path);

        assert!(storage.load_bundles().unwrap().is_empty());

        let mut bundle = Bundle::new();
        bundle.put_long("value", 42);
        bundle.put_str("name", "x");
        let mut bundles = BundleMap::new();
        bundles.insert("data/x".to_owned(), bundle);

        storage.save_bundles(&bundles).unwrap();
        let loaded = storage.load_bundles().unwrap();
        assert_eq!(loaded, bundles);
        assert_eq!(loaded["data/x"].get_long("value", 0), 42);
    }

    #[test]
    fn memory_storage_shares_state_across_clones() {
        let storage = MemoryStorage::new();
        let mut writer = storage.clone();

        let mut bundles = BundleMap::new();
        bundles.insert("data/y".to_owned(), Bundle::new());
        writer.save_bundles(&bundles).unwrap();

        let mut reader = storage.clone();
        assert_eq!(reader.load_bundles().unwrap().len(), 1);
    }
}
