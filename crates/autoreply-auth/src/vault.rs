//! Multi-account credential vault
//!
//! Prefers the OS keyring (service name `autoreply`); when no keyring is
//! reachable, falls back to a user-only JSON file under the platform config
//! directory. Both backends share one logical schema: a credentials blob per
//! handle plus a single `default_handle` marker.

use crate::credentials::Credentials;
use crate::error::{AuthError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

const SERVICE: &str = "autoreply";
const DEFAULT_KEY: &str = "default_handle";
const INDEX_KEY: &str = "handles";

fn credentials_key(handle: &str) -> String {
    format!("credentials/{handle}")
}

/// Credential store with keyring and file backends
pub struct CredentialVault {
    backend: Backend,
}

enum Backend {
    Keyring,
    File(Mutex<FileBackend>),
}

impl CredentialVault {
    /// Open the vault, probing the OS keyring and falling back to the file
    /// backend when the keyring is unreachable.
    pub fn open() -> Result<Self> {
        if keyring_available() {
            tracing::debug!("using OS keyring credential backend");
            return Ok(Self {
                backend: Backend::Keyring,
            });
        }
        let base = dirs::config_dir().ok_or_else(|| {
            AuthError::vault(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no user config directory",
            ))
        })?;
        let path = base.join("autoreply").join("credentials.json");
        tracing::debug!(path = %path.display(), "using file credential backend");
        Ok(Self {
            backend: Backend::File(Mutex::new(FileBackend::new(path))),
        })
    }

    /// Open a file-backed vault at an explicit path (tests, containers)
    pub fn file_at(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::File(Mutex::new(FileBackend::new(path.into()))),
        }
    }

    /// Store credentials for an account. The first stored account becomes
    /// the default implicitly.
    pub fn store(&self, creds: &Credentials) -> Result<()> {
        let first = self.list()?.is_empty();
        match &self.backend {
            Backend::Keyring => {
                let blob = serde_json::to_string(creds)?;
                set_entry(&credentials_key(&creds.handle), &blob)?;
                let mut handles = self.list()?;
                if !handles.iter().any(|h| h == &creds.handle) {
                    handles.push(creds.handle.clone());
                    set_entry(INDEX_KEY, &serde_json::to_string(&handles)?)?;
                }
            }
            Backend::File(file) => {
                let mut file = file.lock().expect("vault lock");
                let mut data = file.load()?;
                data.credentials
                    .insert(creds.handle.clone(), creds.clone());
                file.save(&data)?;
            }
        }
        if first {
            self.set_default(&creds.handle)?;
        }
        Ok(())
    }

    /// Fetch credentials for a handle
    pub fn get(&self, handle: &str) -> Result<Credentials> {
        match &self.backend {
            Backend::Keyring => match get_entry(&credentials_key(handle))? {
                Some(blob) => Ok(serde_json::from_str(&blob)?),
                None => Err(AuthError::account_not_found(handle)),
            },
            Backend::File(file) => {
                let data = file.lock().expect("vault lock").load()?;
                data.credentials
                    .get(handle)
                    .cloned()
                    .ok_or_else(|| AuthError::account_not_found(handle))
            }
        }
    }

    /// Remove an account. Removing the default clears the default marker.
    pub fn delete(&self, handle: &str) -> Result<()> {
        match &self.backend {
            Backend::Keyring => {
                delete_entry(&credentials_key(handle))?;
                let handles: Vec<String> = self
                    .list()?
                    .into_iter()
                    .filter(|h| h != handle)
                    .collect();
                set_entry(INDEX_KEY, &serde_json::to_string(&handles)?)?;
                if self.get_default()?.as_deref() == Some(handle) {
                    delete_entry(DEFAULT_KEY)?;
                }
            }
            Backend::File(file) => {
                let mut file = file.lock().expect("vault lock");
                let mut data = file.load()?;
                data.credentials.remove(handle);
                if data.default_handle.as_deref() == Some(handle) {
                    data.default_handle = None;
                }
                file.save(&data)?;
            }
        }
        Ok(())
    }

    /// All stored handles
    pub fn list(&self) -> Result<Vec<String>> {
        match &self.backend {
            Backend::Keyring => match get_entry(INDEX_KEY)? {
                Some(blob) => Ok(serde_json::from_str(&blob)?),
                None => Ok(Vec::new()),
            },
            Backend::File(file) => {
                let data = file.lock().expect("vault lock").load()?;
                Ok(data.credentials.keys().cloned().collect())
            }
        }
    }

    /// Mark a stored account as the default
    pub fn set_default(&self, handle: &str) -> Result<()> {
        if !self.list()?.iter().any(|h| h == handle) {
            return Err(AuthError::account_not_found(handle));
        }
        match &self.backend {
            Backend::Keyring => set_entry(DEFAULT_KEY, handle),
            Backend::File(file) => {
                let mut file = file.lock().expect("vault lock");
                let mut data = file.load()?;
                data.default_handle = Some(handle.to_string());
                file.save(&data)
            }
        }
    }

    /// The current default handle, if one is set
    pub fn get_default(&self) -> Result<Option<String>> {
        match &self.backend {
            Backend::Keyring => get_entry(DEFAULT_KEY),
            Backend::File(file) => {
                let data = file.lock().expect("vault lock").load()?;
                Ok(data.default_handle)
            }
        }
    }

    /// Credentials for an explicitly named account, or the default account
    /// when no name is given.
    pub fn resolve_account(&self, handle: Option<&str>) -> Result<Credentials> {
        match handle {
            Some(handle) => self.get(handle),
            None => {
                let default = self
                    .get_default()?
                    .ok_or_else(AuthError::auth_required)?;
                self.get(&default)
            }
        }
    }
}

// Keyring plumbing. Entry values are JSON blobs; the keyring cannot
// enumerate entries, so an index entry tracks the stored handles.

fn keyring_entry(key: &str) -> Result<keyring::Entry> {
    keyring::Entry::new(SERVICE, key).map_err(AuthError::vault)
}

fn keyring_available() -> bool {
    match keyring::Entry::new(SERVICE, "__probe__") {
        Ok(entry) => matches!(
            entry.get_password(),
            Ok(_) | Err(keyring::Error::NoEntry)
        ),
        Err(_) => false,
    }
}

fn set_entry(key: &str, value: &str) -> Result<()> {
    keyring_entry(key)?
        .set_password(value)
        .map_err(AuthError::vault)
}

fn get_entry(key: &str) -> Result<Option<String>> {
    match keyring_entry(key)?.get_password() {
        Ok(value) => Ok(Some(value)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(AuthError::vault(e)),
    }
}

fn delete_entry(key: &str) -> Result<()> {
    match keyring_entry(key)?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(AuthError::vault(e)),
    }
}

/// File backend: one JSON document, user-only permissions
struct FileBackend {
    path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileData {
    #[serde(default)]
    credentials: BTreeMap<String, Credentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_handle: Option<String>,
}

impl FileBackend {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn load(&self) -> Result<FileData> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileData::default()),
            Err(e) => Err(AuthError::vault(e)),
        }
    }

    fn save(&mut self, data: &FileData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(AuthError::vault)?;
        }
        let json = serde_json::to_vec_pretty(data)?;
        std::fs::write(&self.path, json).map_err(AuthError::vault)?;
        self.restrict_permissions()
    }

    #[cfg(unix)]
    fn restrict_permissions(&self) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
            .map_err(AuthError::vault)
    }

    #[cfg(not(unix))]
    fn restrict_permissions(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthErrorKind;
    use tempfile::TempDir;
    use url::Url;

    fn creds(handle: &str) -> Credentials {
        Credentials {
            handle: handle.into(),
            did: format!("did:plc:{}", handle.split('.').next().unwrap()),
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            service_url: Url::parse("https://pds.example").unwrap(),
            dpop_key: None,
            expires_at: None,
        }
    }

    fn vault(dir: &TempDir) -> CredentialVault {
        CredentialVault::file_at(dir.path().join("credentials.json"))
    }

    #[test]
    fn first_account_becomes_default() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        vault.store(&creds("alice.bsky.social")).unwrap();
        assert_eq!(
            vault.get_default().unwrap().as_deref(),
            Some("alice.bsky.social")
        );

        vault.store(&creds("bob.bsky.social")).unwrap();
        assert_eq!(
            vault.get_default().unwrap().as_deref(),
            Some("alice.bsky.social")
        );
    }

    #[test]
    fn deleting_default_clears_marker() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        vault.store(&creds("alice.bsky.social")).unwrap();
        vault.store(&creds("bob.bsky.social")).unwrap();
        vault.delete("alice.bsky.social").unwrap();
        assert_eq!(vault.get_default().unwrap(), None);
        assert_eq!(vault.list().unwrap(), vec!["bob.bsky.social"]);
    }

    #[test]
    fn set_default_requires_existing_handle() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        vault.store(&creds("alice.bsky.social")).unwrap();
        let err = vault.set_default("nobody.example.com").unwrap_err();
        assert_eq!(*err.kind(), AuthErrorKind::NotFound);
    }

    #[test]
    fn default_uniqueness_across_op_sequences() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        let handles = ["a.test.com", "b.test.com", "c.test.com"];
        for h in handles {
            vault.store(&creds(h)).unwrap();
        }
        vault.set_default("c.test.com").unwrap();
        vault.delete("a.test.com").unwrap();
        vault.delete("c.test.com").unwrap();
        vault.store(&creds("a.test.com")).unwrap();

        // The default, when set, always names a stored handle.
        let list = vault.list().unwrap();
        match vault.get_default().unwrap() {
            Some(default) => assert!(list.contains(&default)),
            None => {}
        }
    }

    #[test]
    fn resolve_account_prefers_named_then_default() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        vault.store(&creds("alice.bsky.social")).unwrap();
        vault.store(&creds("bob.bsky.social")).unwrap();

        assert_eq!(
            vault.resolve_account(Some("bob.bsky.social")).unwrap().handle,
            "bob.bsky.social"
        );
        assert_eq!(
            vault.resolve_account(None).unwrap().handle,
            "alice.bsky.social"
        );
    }

    #[test]
    fn resolve_account_without_default_requires_auth() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        let err = vault.resolve_account(None).unwrap_err();
        assert_eq!(*err.kind(), AuthErrorKind::AuthRequired);
    }

    #[cfg(unix)]
    #[test]
    fn file_backend_is_user_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        let vault = CredentialVault::file_at(&path);
        vault.store(&creds("alice.bsky.social")).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn get_missing_account_is_not_found() {
        let dir = TempDir::new().unwrap();
        let vault = vault(&dir);
        let err = vault.get("nobody.example.com").unwrap_err();
        assert_eq!(*err.kind(), AuthErrorKind::NotFound);
    }
}
