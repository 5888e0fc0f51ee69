use crate::auth::error::StoreError;
use crate::model::{OnboardingState, UserProfile};
use directories::BaseDirs;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const TOKEN_KEY: &str = "token";
pub const TEST_INFO_KEY: &str = "testInfo";
pub const ONBOARDING_KEY: &str = "onboarding";

const STORE_FILE: &str = "storage.json";

/// Durable string key/value storage, shaped after browser local storage.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Profile kept for test accounts so later test logins can skip the provider.
/// Deliberately carries neither a token nor an expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestAccountSnapshot {
    pub user: UserProfile,
}

/// Typed accessors for the three keys the client owns.
pub trait StoreExt: CredentialStore {
    fn token(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .get(TOKEN_KEY)?
            .filter(|token| !token.trim().is_empty()))
    }

    fn set_token(&self, token: &str) -> Result<(), StoreError> {
        self.set(TOKEN_KEY, token)
    }

    fn clear_token(&self) -> Result<(), StoreError> {
        self.remove(TOKEN_KEY)
    }

    fn test_snapshot(&self) -> Result<Option<TestAccountSnapshot>, StoreError> {
        read_json(self, TEST_INFO_KEY)
    }

    fn set_test_snapshot(&self, snapshot: &TestAccountSnapshot) -> Result<(), StoreError> {
        self.set(TEST_INFO_KEY, &serde_json::to_string(snapshot)?)
    }

    fn clear_test_snapshot(&self) -> Result<(), StoreError> {
        self.remove(TEST_INFO_KEY)
    }

    fn onboarding(&self) -> Result<Option<OnboardingState>, StoreError> {
        read_json(self, ONBOARDING_KEY)
    }

    fn set_onboarding(&self, state: &OnboardingState) -> Result<(), StoreError> {
        self.set(ONBOARDING_KEY, &serde_json::to_string(state)?)
    }
}

impl<T: CredentialStore + ?Sized> StoreExt for T {}

fn read_json<S, T>(store: &S, key: &str) -> Result<Option<T>, StoreError>
where
    S: CredentialStore + ?Sized,
    T: for<'de> Deserialize<'de>,
{
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            tracing::warn!(
                target: "jobpulse::store",
                key,
                error = %err,
                "ignoring unreadable stored value"
            );
            Ok(None)
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// File-backed store: one JSON object in `<dir>/storage.json`, rewritten on
/// every mutation and readable only by the owner on unix.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileCredentialStore {
    pub fn default_dir() -> Result<PathBuf, StoreError> {
        let base = BaseDirs::new()
            .ok_or_else(|| StoreError::Config("unable to determine home directory".into()))?;
        Ok(base.home_dir().join(".jobpulse"))
    }

    pub fn open(dir: Option<&Path>) -> Result<Self, StoreError> {
        let dir = match dir {
            Some(dir) => dir.to_path_buf(),
            None => Self::default_dir()?,
        };
        let path = dir.join(STORE_FILE);
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `entries` to a sibling staging file and renames it over the
    /// store, so readers never see a half-written document.
    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let serialized = serde_json::to_vec_pretty(entries)?;
        let staging = self.path.with_extension("json.tmp");
        let written = write_owner_only(&staging, &serialized)
            .and_then(|()| fs::rename(&staging, &self.path));
        if let Err(err) = written {
            let _ = fs::remove_file(&staging);
            return Err(err.into());
        }
        Ok(())
    }

    /// Applies `change` to a copy of the entries; memory only moves once the
    /// copy is on disk.
    fn commit(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, String>) -> bool,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        if !change(&mut next) {
            return Ok(());
        }
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }
}

fn write_owner_only(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(bytes)?;
    file.sync_all()
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.commit(|entries| {
            entries.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.commit(|entries| entries.remove(key).is_some())
    }
}
