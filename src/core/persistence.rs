/// Persistence adapter — save records in a key-value store.
use regex::Regex;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

use crate::schema::save::{SaveError, SaveRecord};

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_ ]+").expect("save key regex must compile"));
static SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" +").expect("save key regex must compile"));

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid store key: {0}")]
    InvalidKey(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Record(#[from] SaveError),
    #[error("no save data under '{0}'")]
    NoSave(String),
}

/// String key-value storage, in the manner of `window.localStorage`.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

/// Process-local store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: FxHashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// One file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<FileStore, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(FileStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains(['/', '\\'])
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        std::fs::write(path, value)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Storage key for a story's save: lower-cased, non-word characters
/// stripped, runs of spaces turned into `-`, then `.save`.
pub fn save_key(story_name: &str) -> String {
    let lowered = story_name.to_lowercase();
    let stripped = NON_WORD.replace_all(&lowered, "");
    format!("{}.save", SPACES.replace_all(&stripped, "-"))
}

/// Reads and writes one story's save record.
#[derive(Debug, Clone)]
pub struct SaveSlot<S> {
    store: S,
    key: String,
}

impl<S: KeyValueStore> SaveSlot<S> {
    pub fn new(store: S, story_name: &str) -> Self {
        Self {
            store,
            key: save_key(story_name),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn exists(&self) -> Result<bool, PersistenceError> {
        Ok(self.store.get(&self.key)?.is_some())
    }

    pub fn load(&self) -> Result<SaveRecord, PersistenceError> {
        let data = self
            .store
            .get(&self.key)?
            .ok_or_else(|| PersistenceError::NoSave(self.key.clone()))?;
        Ok(SaveRecord::from_json(&data)?)
    }

    pub fn save(&mut self, record: &SaveRecord) -> Result<(), PersistenceError> {
        let data = record.to_json().map_err(SaveError::from)?;
        self.store.set(&self.key, &data)?;
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), PersistenceError> {
        self.store.remove(&self.key)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::passage::PassageId;

    #[test]
    fn save_key_normalization() {
        assert_eq!(save_key("The Cave"), "the-cave.save");
        assert_eq!(save_key("Mr. Smith's  Big   Day!"), "mr-smiths-big-day.save");
        assert_eq!(save_key("under_score 2"), "under_score-2.save");
    }

    #[test]
    fn memory_store_roundtrip() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap(), Some("v".to_string()));
        store.remove("k").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path().join("saves")).unwrap();
        store.set("story.save", "{}").unwrap();
        assert_eq!(store.get("story.save").unwrap(), Some("{}".to_string()));
        store.remove("story.save").unwrap();
        assert_eq!(store.get("story.save").unwrap(), None);
        store.remove("story.save").unwrap();
    }

    #[test]
    fn file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.set("../escape", "x"),
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn slot_save_load_clear() {
        let mut slot = SaveSlot::new(MemoryStore::new(), "The Cave");
        assert!(!slot.exists().unwrap());
        assert!(matches!(slot.load(), Err(PersistenceError::NoSave(key)) if key == "the-cave.save"));

        let record = SaveRecord {
            history: vec![PassageId(1), PassageId(2)],
            current_checkpoint: "Start".to_string(),
            ..SaveRecord::default()
        };
        slot.save(&record).unwrap();
        assert!(slot.store().get("the-cave.save").unwrap().is_some());
        assert_eq!(slot.load().unwrap(), record);

        slot.clear().unwrap();
        assert!(!slot.exists().unwrap());
    }

    #[test]
    fn slot_rejects_corrupt_data() {
        let mut store = MemoryStore::new();
        store.set("x.save", "{\"history\": []}").unwrap();
        let slot = SaveSlot::new(store, "x");
        assert!(matches!(slot.load(), Err(PersistenceError::Record(_))));
    }
}
