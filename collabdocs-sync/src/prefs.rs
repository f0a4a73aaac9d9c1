//! Client-local preferences: display name, owned documents, recent documents.
//!
//! Everything sits behind a small string key/value port so the session
//! never touches a concrete storage backend. [`FileStore`] keeps the whole
//! map in one JSON file, loaded on open and rewritten on every mutation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::Document;
use crate::error::PrefsError;

pub const DISPLAY_NAME_KEY: &str = "collabdocs_display_name";
pub const OWNER_KEY: &str = "collabdocs_owner_docs";
pub const RECENT_KEY: &str = "collabdocs_recent_docs";

/// Most recently used documents kept.
pub const MAX_RECENT: usize = 9;

/// String key/value storage.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> Result<(), PrefsError>;
    fn remove(&mut self, key: &str) -> Result<(), PrefsError>;
}

/// Volatile store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), PrefsError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PrefsError> {
        self.values.remove(key);
        Ok(())
    }
}

/// Single JSON file store.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FileStore {
    /// Load `path`, starting empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PrefsError> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), PrefsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), PrefsError> {
        self.values.insert(key.to_string(), value);
        self.persist()
    }

    fn remove(&mut self, key: &str) -> Result<(), PrefsError> {
        if self.values.remove(key).is_some() {
            self.persist()?;
        }
        Ok(())
    }
}

/// Entry of the recent documents list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentDoc {
    pub id: Uuid,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

impl From<&Document> for RecentDoc {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id,
            title: doc.title.clone(),
            updated_at: doc.updated_at,
        }
    }
}

/// Typed preferences over any [`KeyValueStore`].
#[derive(Debug)]
pub struct Preferences<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> Preferences<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    /// Last used display name, if any.
    pub fn display_name(&self) -> Option<String> {
        self.store
            .get(DISPLAY_NAME_KEY)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    }

    /// Store a display name. Blank names are ignored and yield `None`.
    pub fn set_display_name(&mut self, name: &str) -> Result<Option<String>, PrefsError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        self.store.set(DISPLAY_NAME_KEY, name.to_string())?;
        Ok(Some(name.to_string()))
    }

    /// Documents created from this client.
    pub fn owned_docs(&self) -> Vec<Uuid> {
        self.store
            .get(OWNER_KEY)
            .and_then(|raw| serde_json::from_str::<Vec<Uuid>>(&raw).ok())
            .unwrap_or_default()
    }

    pub fn is_owner(&self, doc_id: Uuid) -> bool {
        self.owned_docs().contains(&doc_id)
    }

    /// Returns `false` if the document was already marked.
    pub fn mark_owner(&mut self, doc_id: Uuid) -> Result<bool, PrefsError> {
        let mut owned = self.owned_docs();
        if owned.contains(&doc_id) {
            return Ok(false);
        }
        owned.push(doc_id);
        self.store.set(OWNER_KEY, serde_json::to_string(&owned)?)?;
        Ok(true)
    }

    /// Recent documents, most recent first. Unreadable entries are skipped.
    pub fn recent_docs(&self) -> Vec<RecentDoc> {
        let Some(raw) = self.store.get(RECENT_KEY) else {
            return Vec::new();
        };
        let Ok(entries) = serde_json::from_str::<Vec<serde_json::Value>>(&raw) else {
            log::debug!("Ignoring corrupt recent documents list");
            return Vec::new();
        };
        entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value::<RecentDoc>(entry).ok())
            .filter(|doc| !doc.title.is_empty())
            .collect()
    }

    /// Move `doc` to the front, dropping older copies and overflow.
    pub fn save_recent(&mut self, doc: RecentDoc) -> Result<(), PrefsError> {
        let mut recent: Vec<RecentDoc> = self
            .recent_docs()
            .into_iter()
            .filter(|item| item.id != doc.id)
            .collect();
        recent.insert(0, doc);
        recent.truncate(MAX_RECENT);
        self.store.set(RECENT_KEY, serde_json::to_string(&recent)?)
    }

    pub fn remove_recent(&mut self, doc_id: Uuid) -> Result<(), PrefsError> {
        let recent: Vec<RecentDoc> = self
            .recent_docs()
            .into_iter()
            .filter(|item| item.id != doc_id)
            .collect();
        self.store.set(RECENT_KEY, serde_json::to_string(&recent)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn recent(n: u8) -> RecentDoc {
        RecentDoc {
            id: Uuid::from_bytes([n; 16]),
            title: format!("Doc {n}"),
            updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, n as u32).unwrap(),
        }
    }

    #[test]
    fn test_display_name_trimmed() {
        let mut prefs = Preferences::new(MemoryStore::new());
        assert!(prefs.display_name().is_none());
        assert_eq!(prefs.set_display_name("  Ada ").unwrap().as_deref(), Some("Ada"));
        assert_eq!(prefs.display_name().as_deref(), Some("Ada"));
        assert!(prefs.set_display_name("   ").unwrap().is_none());
        assert_eq!(prefs.display_name().as_deref(), Some("Ada"));
    }

    #[test]
    fn test_owner_set() {
        let mut prefs = Preferences::new(MemoryStore::new());
        let id = Uuid::new_v4();
        assert!(!prefs.is_owner(id));
        assert!(prefs.mark_owner(id).unwrap());
        assert!(!prefs.mark_owner(id).unwrap());
        assert!(prefs.is_owner(id));
        assert_eq!(prefs.owned_docs().len(), 1);
    }

    #[test]
    fn test_recent_most_recent_first_dedup() {
        let mut prefs = Preferences::new(MemoryStore::new());
        prefs.save_recent(recent(1)).unwrap();
        prefs.save_recent(recent(2)).unwrap();
        prefs.save_recent(recent(1)).unwrap();

        let ids: Vec<_> = prefs.recent_docs().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![recent(1).id, recent(2).id]);
    }

    #[test]
    fn test_recent_capped() {
        let mut prefs = Preferences::new(MemoryStore::new());
        for n in 0..15 {
            prefs.save_recent(recent(n)).unwrap();
        }
        let docs = prefs.recent_docs();
        assert_eq!(docs.len(), MAX_RECENT);
        assert_eq!(docs[0].id, recent(14).id);
        assert_eq!(docs[MAX_RECENT - 1].id, recent(6).id);
    }

    #[test]
    fn test_remove_recent() {
        let mut prefs = Preferences::new(MemoryStore::new());
        prefs.save_recent(recent(1)).unwrap();
        prefs.save_recent(recent(2)).unwrap();
        prefs.remove_recent(recent(1).id).unwrap();
        assert_eq!(prefs.recent_docs(), vec![recent(2)]);
    }

    #[test]
    fn test_corrupt_recent_entries_ignored() {
        let mut store = MemoryStore::new();
        let good = serde_json::to_value(recent(3)).unwrap();
        let stale = serde_json::json!({
            "id": Uuid::nil(),
            "title": "",
            "updatedAt": "2024-01-01T00:00:00Z"
        });
        let raw = serde_json::json!([good, { "id": "nope" }, 42, stale]);
        store.set(RECENT_KEY, raw.to_string()).unwrap();
        let prefs = Preferences::new(store);
        assert_eq!(prefs.recent_docs(), vec![recent(3)]);

        let mut broken = MemoryStore::new();
        broken.set(RECENT_KEY, "{not-json".into()).unwrap();
        assert!(Preferences::new(broken).recent_docs().is_empty());
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");
        {
            let mut prefs = Preferences::new(FileStore::open(&path).unwrap());
            prefs.set_display_name("Grace").unwrap();
            prefs.save_recent(recent(7)).unwrap();
        }
        let prefs = Preferences::new(FileStore::open(&path).unwrap());
        assert_eq!(prefs.display_name().as_deref(), Some("Grace"));
        assert_eq!(prefs.recent_docs(), vec![recent(7)]);
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "garbage").unwrap();
        assert!(matches!(FileStore::open(&path), Err(PrefsError::Json(_))));
    }

    #[test]
    fn test_recent_from_document() {
        let doc = Document {
            id: Uuid::nil(),
            title: "Notes".into(),
            updated_at: Utc.with_ymd_and_hms(2024, 2, 2, 0, 0, 0).unwrap(),
        };
        let entry = RecentDoc::from(&doc);
        assert_eq!(entry.title, "Notes");
        assert_eq!(entry.id, Uuid::nil());
    }
}
