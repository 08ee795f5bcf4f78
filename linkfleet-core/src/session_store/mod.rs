//! Durable session state
//!
//! On-disk layout:
//! ```text
//! <sessions_dir>/
//!   device<id>/          one directory per account
//!     creds.json         protocol credential blob, stored verbatim
//! <active_list_file>     JSON array of account ids to resume on startup
//! ```
//!
//! Every file is written atomically (temp file, then rename). Writes to the
//! active list go through a single async mutex so concurrent connects for
//! different accounts cannot lose each other's updates.

mod error;

pub use error::{StoreError, StoreResult};

use crate::account::{AccountId, CredentialBlob};
use crate::config::StoreConfig;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Well-known credential file whose presence means the account has paired
pub const CREDENTIALS_FILE: &str = "creds.json";

/// Prefix of every per-account directory
const SESSION_DIR_PREFIX: &str = "device";

/// File-backed session store
pub struct SessionStore {
    sessions_dir: PathBuf,
    active_list_file: PathBuf,
    /// Serialises read-modify-write cycles on the active list
    list_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(sessions_dir: impl Into<PathBuf>, active_list_file: impl Into<PathBuf>) -> Self {
        SessionStore {
            sessions_dir: sessions_dir.into(),
            active_list_file: active_list_file.into(),
            list_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.sessions_dir.clone(), config.active_list_file.clone())
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    pub fn active_list_file(&self) -> &Path {
        &self.active_list_file
    }

    /// Directory for an account, without touching the filesystem
    pub fn dir_for(&self, id: &AccountId) -> PathBuf {
        self.sessions_dir
            .join(format!("{}{}", SESSION_DIR_PREFIX, escape_component(id.as_str())))
    }

    /// Ensure and return the directory for an account
    pub async fn path_for(&self, id: &AccountId) -> StoreResult<PathBuf> {
        let dir = self.dir_for(id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;
        Ok(dir)
    }

    /// Whether the account has a persisted credential file
    pub async fn has_credentials(&self, id: &AccountId) -> bool {
        fs::try_exists(self.dir_for(id).join(CREDENTIALS_FILE))
            .await
            .unwrap_or(false)
    }

    pub async fn load_credentials(&self, id: &AccountId) -> StoreResult<Option<CredentialBlob>> {
        let path = self.dir_for(id).join(CREDENTIALS_FILE);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(CredentialBlob::new(bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    pub async fn save_credentials(&self, id: &AccountId, blob: &CredentialBlob) -> StoreResult<()> {
        let dir = self.path_for(id).await?;
        write_atomic(&dir.join(CREDENTIALS_FILE), blob.as_bytes()).await?;
        debug!(account = %id, bytes = blob.len(), "credentials persisted");
        Ok(())
    }

    /// Recursively remove an account's directory; a missing directory is fine
    pub async fn delete_credentials(&self, id: &AccountId) -> StoreResult<()> {
        let dir = self.dir_for(id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(account = %id, "session directory removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(dir, e)),
        }
    }

    /// Current active list, empty when the file does not exist
    pub async fn load_active(&self) -> StoreResult<Vec<AccountId>> {
        let raw = match fs::read(&self.active_list_file).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.active_list_file, e)),
        };

        let entries: Vec<String> =
            serde_json::from_slice(&raw).map_err(|source| StoreError::Corrupt {
                path: self.active_list_file.clone(),
                source,
            })?;

        let mut ids: Vec<AccountId> = Vec::with_capacity(entries.len());
        for entry in entries {
            match AccountId::new(&entry) {
                Ok(id) if !ids.contains(&id) => ids.push(id),
                Ok(_) => {}
                Err(e) => warn!(entry = %entry, error = %e, "skipping invalid active list entry"),
            }
        }
        Ok(ids)
    }

    /// Append to the active list if absent. Returns whether the list changed.
    pub async fn mark_active(&self, id: &AccountId) -> StoreResult<bool> {
        let _guard = self.list_lock.lock().await;
        let mut ids = self.load_active().await?;
        if ids.contains(id) {
            return Ok(false);
        }
        ids.push(id.clone());
        self.write_active(&ids).await?;
        Ok(true)
    }

    /// Drop an account from the active list. Returns whether the list changed.
    pub async fn remove_active(&self, id: &AccountId) -> StoreResult<bool> {
        let _guard = self.list_lock.lock().await;
        let mut ids = self.load_active().await?;
        let before = ids.len();
        ids.retain(|existing| existing != id);
        if ids.len() == before {
            return Ok(false);
        }
        self.write_active(&ids).await?;
        Ok(true)
    }

    /// Overwrite the active list wholesale
    pub async fn replace_active(&self, ids: &[AccountId]) -> StoreResult<()> {
        let _guard = self.list_lock.lock().await;
        self.write_active(ids).await
    }

    async fn write_active(&self, ids: &[AccountId]) -> StoreResult<()> {
        let body = serde_json::to_vec(ids).map_err(StoreError::Serialize)?;
        if let Some(parent) = self.active_list_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::io(parent, e))?;
            }
        }
        write_atomic(&self.active_list_file, &body).await
    }
}

/// Write to a sibling temp file, then rename over the target
async fn write_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, data)
        .await
        .map_err(|e| StoreError::io(&temp_path, e))?;
    fs::rename(&temp_path, path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

/// Map an identifier onto a single safe path component.
///
/// ASCII alphanumerics and `-_+.` pass through (a leading `.` does not);
/// every other byte becomes `%XX`.
fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for (i, byte) in raw.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric()
            || matches!(byte, b'-' | b'_' | b'+')
            || (byte == b'.' && i > 0);
        if keep {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> SessionStore {
        SessionStore::new(dir.path().join("sessions"), dir.path().join("active.json"))
    }

    fn id(raw: &str) -> AccountId {
        AccountId::new(raw).unwrap()
    }

    #[test]
    fn test_escape_component_keeps_phone_numbers() {
        assert_eq!(escape_component("628123456"), "628123456");
        assert_eq!(escape_component("+62-812"), "+62-812");
    }

    #[test]
    fn test_escape_component_neutralises_separators() {
        assert_eq!(escape_component("../etc"), "%2E.%2Fetc");
        assert_eq!(escape_component("a b"), "a%20b");
        assert!(!escape_component("x/y\\z").contains('/'));
        assert!(!escape_component("x/y\\z").contains('\\'));
    }

    #[tokio::test]
    async fn test_path_for_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);

        let dir = store.path_for(&id("111")).await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir, tmp.path().join("sessions").join("device111"));
    }

    #[tokio::test]
    async fn test_load_active_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        assert!(store.load_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_active_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);

        assert!(store.mark_active(&id("111")).await.unwrap());
        assert!(!store.mark_active(&id("111")).await.unwrap());

        assert_eq!(store.load_active().await.unwrap(), vec![id("111")]);
    }

    #[tokio::test]
    async fn test_active_list_file_is_json_array() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);

        store.mark_active(&id("111")).await.unwrap();
        store.mark_active(&id("222")).await.unwrap();

        let raw = std::fs::read_to_string(store.active_list_file()).unwrap();
        assert_eq!(raw, r#"["111","222"]"#);
    }

    #[tokio::test]
    async fn test_remove_active() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);

        store.mark_active(&id("111")).await.unwrap();
        store.mark_active(&id("222")).await.unwrap();

        assert!(store.remove_active(&id("111")).await.unwrap());
        assert!(!store.remove_active(&id("333")).await.unwrap());
        assert_eq!(store.load_active().await.unwrap(), vec![id("222")]);
    }

    #[tokio::test]
    async fn test_remove_active_without_file() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        assert!(!store.remove_active(&id("111")).await.unwrap());
        assert!(!store.active_list_file().exists());
    }

    #[tokio::test]
    async fn test_load_active_rejects_corrupt_file() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        std::fs::write(store.active_list_file(), "not json").unwrap();

        let err = store.load_active().await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_load_active_skips_blank_and_duplicate_entries() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        std::fs::write(store.active_list_file(), r#"["111",""," ","111","222"]"#).unwrap();

        assert_eq!(store.load_active().await.unwrap(), vec![id("111"), id("222")]);
    }

    #[tokio::test]
    async fn test_credentials_roundtrip_verbatim() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let account = id("111");

        assert!(!store.has_credentials(&account).await);
        assert!(store.load_credentials(&account).await.unwrap().is_none());

        let blob = CredentialBlob::new(b"{\"noiseKey\":[1,2,3]}".to_vec());
        store.save_credentials(&account, &blob).await.unwrap();

        assert!(store.has_credentials(&account).await);
        assert_eq!(store.load_credentials(&account).await.unwrap(), Some(blob));
        assert!(!store.dir_for(&account).join("creds.tmp").exists());
    }

    #[tokio::test]
    async fn test_delete_credentials_tolerates_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let account = id("111");

        store.delete_credentials(&account).await.unwrap();

        store
            .save_credentials(&account, &CredentialBlob::new(b"x".to_vec()))
            .await
            .unwrap();
        store.delete_credentials(&account).await.unwrap();
        assert!(!store.dir_for(&account).exists());
    }

    #[tokio::test]
    async fn test_concurrent_mark_active_keeps_every_id() {
        let tmp = TempDir::new().unwrap();
        let store = std::sync::Arc::new(store_in(&tmp));

        let mut tasks = Vec::new();
        for n in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.mark_active(&id(&format!("62{}", n))).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.load_active().await.unwrap().len(), 16);
    }
}
