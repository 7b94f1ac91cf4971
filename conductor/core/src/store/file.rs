//! JSON-file stores
//!
//! One pretty-printed JSON file per id. Ids are escaped so arbitrary user ids
//! cannot leave the store directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{StateStore, UserStore};
use crate::models::{State, User};

/// Default data directory: `$XDG_DATA_HOME/parley` (or `./.parley`)
#[must_use]
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir().map_or_else(|| PathBuf::from(".parley"), |d| d.join("parley"))
}

fn escape_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for b in id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

fn record_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{}.json", escape_id(id)))
}

async fn read_record<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let record = serde_json::from_slice(&bytes)
                .with_context(|| format!("Corrupt record at {}", path.display()))?;
            Ok(Some(record))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

async fn write_record<T: Serialize>(dir: &Path, path: &Path, record: &T) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let bytes = serde_json::to_vec_pretty(record)?;
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

async fn remove_record(path: &Path) -> anyhow::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

/// Users stored as `<dir>/<id>.json`
#[derive(Clone, Debug)]
pub struct FileUserStore {
    dir: PathBuf,
}

impl FileUserStore {
    /// Store users under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl UserStore for FileUserStore {
    async fn get(&self, user_id: &str) -> anyhow::Result<User> {
        let path = record_path(&self.dir, user_id);
        Ok(read_record(&path)
            .await?
            .unwrap_or_else(|| User::new(user_id)))
    }

    async fn save(&self, user: &User) -> anyhow::Result<()> {
        write_record(&self.dir, &record_path(&self.dir, &user.id), user).await
    }

    async fn delete(&self, user_id: &str) -> anyhow::Result<()> {
        remove_record(&record_path(&self.dir, user_id)).await
    }
}

/// States stored as `<dir>/<id>.json`, expiring after `timeout_seconds`
#[derive(Clone, Debug)]
pub struct FileStateStore {
    dir: PathBuf,
    timeout_seconds: u64,
}

impl FileStateStore {
    /// Store states under `dir`
    pub fn new(dir: impl Into<PathBuf>, timeout_seconds: u64) -> Self {
        Self {
            dir: dir.into(),
            timeout_seconds,
        }
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, user_id: &str) -> anyhow::Result<State> {
        let path = record_path(&self.dir, user_id);
        match read_record::<State>(&path).await? {
            Some(state) if !state.is_stale(self.timeout_seconds, Utc::now()) => Ok(state),
            Some(_) => {
                tracing::debug!(user_id = %user_id, "Discarded stale state file");
                remove_record(&path).await?;
                Ok(State::new(user_id))
            }
            None => Ok(State::new(user_id)),
        }
    }

    async fn save(&self, state: &State) -> anyhow::Result<()> {
        let mut state = state.clone();
        state.updated_at = Utc::now();
        write_record(&self.dir, &record_path(&self.dir, &state.user_id), &state).await
    }

    async fn delete(&self, user_id: &str) -> anyhow::Result<()> {
        remove_record(&record_path(&self.dir, user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_escape_id_keeps_paths_inside_dir() {
        assert_eq!(escape_id("alice-01"), "alice-01");
        assert_eq!(escape_id("../etc"), "%2E%2E%2Fetc");
    }

    #[tokio::test]
    async fn test_state_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path(), 300);

        let mut state = State::new("alice");
        state.topic.name = "weather".to_string();
        store.save(&state).await.unwrap();

        let loaded = store.get("alice").await.unwrap();
        assert_eq!(loaded.topic.name, "weather");

        store.delete("alice").await.unwrap();
        assert!(!store.get("alice").await.unwrap().topic.is_active());
    }

    #[tokio::test]
    async fn test_stale_state_file_removed() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path(), 60);

        let mut state = State::new("alice");
        state.topic.name = "weather".to_string();
        state.updated_at = Utc::now() - Duration::seconds(120);
        write_record(dir.path(), &record_path(dir.path(), "alice"), &state)
            .await
            .unwrap();

        let loaded = store.get("alice").await.unwrap();
        assert!(!loaded.topic.is_active());
        assert!(!record_path(dir.path(), "alice").exists());
    }

    #[tokio::test]
    async fn test_user_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileUserStore::new(dir.path());

        let mut user = User::new("bob");
        user.name = "Bob".to_string();
        store.save(&user).await.unwrap();
        assert_eq!(store.get("bob").await.unwrap().name, "Bob");

        store.delete("bob").await.unwrap();
        store.delete("bob").await.unwrap();
        assert_eq!(store.get("bob").await.unwrap().name, "");
    }
}
