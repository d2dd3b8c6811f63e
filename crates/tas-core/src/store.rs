//! Durable allow-list storage.
//!
//! The data file is a single human-readable JSON record that is safe to
//! hand-edit between runs:
//!
//! ```json
//! { "whitelist": [777000, 123456789] }
//! ```
//!
//! Earlier releases wrote a bare JSON array (of numbers or strings); `load`
//! still accepts that shape. Storage failures never escalate: a bad read
//! degrades to an empty set, a bad write is logged by the caller and the
//! in-memory set stays authoritative until the next flush.

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{domain::ConversationId, errors::Error, Result};

/// Set of conversations exempt from challenge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Allowlist {
    ids: HashSet<ConversationId>,
}

impl Allowlist {
    pub fn contains(&self, id: ConversationId) -> bool {
        self.ids.contains(&id)
    }

    /// Idempotent; returns whether the id was newly added.
    pub fn insert(&mut self, id: ConversationId) -> bool {
        self.ids.insert(id)
    }

    pub fn remove(&mut self, id: ConversationId) -> bool {
        self.ids.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Deterministic ordering for serialization and logs.
    pub fn sorted_ids(&self) -> Vec<ConversationId> {
        let mut ids: Vec<_> = self.ids.iter().copied().collect();
        ids.sort();
        ids
    }
}

impl FromIterator<ConversationId> for Allowlist {
    fn from_iter<T: IntoIterator<Item = ConversationId>>(iter: T) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct StoreRecord {
    whitelist: Vec<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredDocument {
    Record { whitelist: Vec<StoredId> },
    Legacy(Vec<StoredId>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredId {
    Numeric(i64),
    Text(String),
}

impl StoredId {
    fn resolve(&self) -> Result<ConversationId> {
        match self {
            StoredId::Numeric(n) => Ok(ConversationId(*n)),
            StoredId::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(ConversationId)
                .map_err(|_| Error::Storage(format!("invalid whitelist entry: {s:?}"))),
        }
    }
}

pub struct AllowlistStore {
    path: PathBuf,
}

impl AllowlistStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted allow-list. Missing or malformed content yields an
    /// empty set with a warning; this never fails the process.
    pub fn load(&self) -> Allowlist {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                println!(
                    "[STORE] no data file at {}, starting empty",
                    self.path.display()
                );
                return Allowlist::default();
            }
            Err(e) => {
                eprintln!(
                    "[STORE] failed to read {}: {e}; starting empty",
                    self.path.display()
                );
                return Allowlist::default();
            }
        };

        match parse_allowlist(&raw) {
            Ok(allowlist) => allowlist,
            Err(e) => {
                eprintln!(
                    "[STORE] malformed data file {}: {e}; starting empty",
                    self.path.display()
                );
                Allowlist::default()
            }
        }
    }

    /// Serialize the set (sorted) and replace the data file atomically:
    /// write to `<path>.tmp`, then rename over the previous snapshot.
    pub fn save(&self, allowlist: &Allowlist) -> Result<()> {
        let record = StoreRecord {
            whitelist: allowlist.sorted_ids().iter().map(|id| id.0).collect(),
        };
        let mut body = serde_json::to_string_pretty(&record)?;
        body.push('\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = tmp_path(&self.path);
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

fn parse_allowlist(raw: &str) -> Result<Allowlist> {
    let document: StoredDocument = serde_json::from_str(raw)?;
    let entries = match &document {
        StoredDocument::Record { whitelist } => whitelist,
        StoredDocument::Legacy(entries) => entries,
    };

    let mut allowlist = Allowlist::default();
    for entry in entries {
        allowlist.insert(entry.resolve()?);
    }
    Ok(allowlist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tmp_file(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}.json"))
    }

    fn ids(raw: &[i64]) -> Allowlist {
        raw.iter().copied().map(ConversationId).collect()
    }

    #[test]
    fn save_then_load_round_trips() {
        let store = AllowlistStore::new(tmp_file("tas-store-roundtrip"));
        let allowlist = ids(&[42, 7, 100]);

        store.save(&allowlist).unwrap();
        assert_eq!(store.load(), allowlist);

        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn save_is_deterministic_and_leaves_no_tmp_file() {
        let store = AllowlistStore::new(tmp_file("tas-store-determinism"));
        let allowlist = ids(&[3, 1, 2]);

        store.save(&allowlist).unwrap();
        let first = fs::read_to_string(store.path()).unwrap();
        store.save(&allowlist).unwrap();
        let second = fs::read_to_string(store.path()).unwrap();

        assert_eq!(first, second);
        assert!(first.find('1').unwrap() < first.find('2').unwrap());
        assert!(!tmp_path(store.path()).exists());

        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn load_missing_file_yields_empty_set() {
        let store = AllowlistStore::new(tmp_file("tas-store-missing"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn load_malformed_content_yields_empty_set() {
        let store = AllowlistStore::new(tmp_file("tas-store-malformed"));
        fs::write(store.path(), "{ not json").unwrap();
        assert!(store.load().is_empty());

        fs::write(store.path(), r#"{"whitelist": ["abc"]}"#).unwrap();
        assert!(store.load().is_empty());

        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn load_accepts_legacy_array_formats() {
        let store = AllowlistStore::new(tmp_file("tas-store-legacy"));

        fs::write(store.path(), r#"["123", "456"]"#).unwrap();
        assert_eq!(store.load(), ids(&[123, 456]));

        fs::write(store.path(), r#"[123, 456]"#).unwrap();
        assert_eq!(store.load(), ids(&[123, 456]));

        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn load_accepts_string_ids_in_record() {
        let store = AllowlistStore::new(tmp_file("tas-store-strings"));
        fs::write(store.path(), r#"{"whitelist": ["777000", 42]}"#).unwrap();
        assert_eq!(store.load(), ids(&[777000, 42]));

        let _ = fs::remove_file(store.path());
    }
}
