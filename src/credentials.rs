//! Credential and profile persistence
//!
//! The connection manager only needs credentials; the profile display name is
//! attached to outbound commands as `user`. Storage sits behind an async trait
//! so the CLI can use files and tests can use memory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const USER_FILE: &str = "user.json";
const PROFILE_FILE: &str = "profile.json";

/// Broker login
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Both username and password are non-empty
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Profile shown to the controller as the command author
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

impl UserProfile {
    /// Display name, if it is not blank
    pub fn author(&self) -> Option<&str> {
        let name = self.display_name.trim();
        (!name.is_empty()).then_some(name)
    }
}

/// Partial profile update; `None` fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub profile_image: Option<String>,
}

impl ProfileUpdate {
    fn apply(self, mut profile: UserProfile) -> UserProfile {
        if let Some(display_name) = self.display_name {
            profile.display_name = display_name;
        }
        if let Some(profile_image) = self.profile_image {
            profile.profile_image = Some(profile_image);
        }
        profile
    }
}

/// Credential store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access credential store: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupted credential store entry {entry}: {source}")]
    Corrupted {
        entry: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Serialization error")]
    Serialization(#[source] serde_json::Error),
}

/// Persistent storage for credentials and the user profile
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Stored credentials; incomplete entries read as `None`
    async fn load_credentials(&self) -> Result<Option<Credentials>, StoreError>;

    async fn save_credentials(&self, credentials: &Credentials) -> Result<(), StoreError>;

    async fn clear_credentials(&self) -> Result<(), StoreError>;

    async fn load_profile(&self) -> Result<Option<UserProfile>, StoreError>;

    /// Merge `update` into the stored profile and return the result
    async fn update_profile(&self, update: ProfileUpdate) -> Result<UserProfile, StoreError>;
}

/// JSON files in a private directory
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read_entry(&self, name: &'static str) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.dir.join(name)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn write_entry(&self, name: &'static str, content: String) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(name);
        tokio::fs::write(&path, content).await?;
        restrict_permissions(&path).await?;
        debug!(path = %path.display(), "Credential store entry written");
        Ok(())
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load_credentials(&self) -> Result<Option<Credentials>, StoreError> {
        let Some(content) = self.read_entry(USER_FILE).await? else {
            return Ok(None);
        };
        let credentials: Credentials =
            serde_json::from_str(&content).map_err(|source| StoreError::Corrupted {
                entry: USER_FILE,
                source,
            })?;
        if !credentials.is_complete() {
            warn!("Stored credentials are incomplete, ignoring them");
            return Ok(None);
        }
        Ok(Some(credentials))
    }

    async fn save_credentials(&self, credentials: &Credentials) -> Result<(), StoreError> {
        let content = serde_json::to_string(credentials).map_err(StoreError::Serialization)?;
        self.write_entry(USER_FILE, content).await
    }

    async fn clear_credentials(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.dir.join(USER_FILE)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn load_profile(&self) -> Result<Option<UserProfile>, StoreError> {
        let Some(content) = self.read_entry(PROFILE_FILE).await? else {
            return Ok(None);
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Corrupted {
                entry: PROFILE_FILE,
                source,
            })
    }

    async fn update_profile(&self, update: ProfileUpdate) -> Result<UserProfile, StoreError> {
        let current = self.load_profile().await?.unwrap_or_default();
        let updated = update.apply(current);
        let content = serde_json::to_string(&updated).map_err(StoreError::Serialization)?;
        self.write_entry(PROFILE_FILE, content).await?;
        Ok(updated)
    }
}

/// Volatile store for tests and one-shot invocations
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: Mutex<Option<Credentials>>,
    profile: Mutex<Option<UserProfile>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: Mutex::new(Some(credentials)),
            profile: Mutex::new(None),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load_credentials(&self) -> Result<Option<Credentials>, StoreError> {
        let credentials = self.credentials.lock().await;
        Ok(credentials.clone().filter(Credentials::is_complete))
    }

    async fn save_credentials(&self, credentials: &Credentials) -> Result<(), StoreError> {
        *self.credentials.lock().await = Some(credentials.clone());
        Ok(())
    }

    async fn clear_credentials(&self) -> Result<(), StoreError> {
        *self.credentials.lock().await = None;
        Ok(())
    }

    async fn load_profile(&self) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.profile.lock().await.clone())
    }

    async fn update_profile(&self, update: ProfileUpdate) -> Result<UserProfile, StoreError> {
        let mut profile = self.profile.lock().await;
        let updated = update.apply(profile.clone().unwrap_or_default());
        *profile = Some(updated.clone());
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_completeness() {
        assert!(Credentials::new("mario", "pw").is_complete());
        assert!(!Credentials::new("", "pw").is_complete());
        assert!(!Credentials::new("mario", "").is_complete());
    }

    #[test]
    fn test_debug_hides_password() {
        let rendered = format!("{:?}", Credentials::new("mario", "hunter2"));
        assert!(rendered.contains("mario"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_profile_author() {
        let mut profile = UserProfile::default();
        assert_eq!(profile.author(), None);

        profile.display_name = "  Lucia ".to_string();
        assert_eq!(profile.author(), Some("Lucia"));
    }

    #[test]
    fn test_profile_wire_names() {
        let profile = UserProfile {
            display_name: "Lucia".to_string(),
            profile_image: Some("file:///avatar.png".to_string()),
        };
        let json = serde_json::to_string(&profile).unwrap();
        assert!(json.contains("displayName"));
        assert!(json.contains("profileImage"));
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryCredentialStore::new();
        assert!(store.load_credentials().await.unwrap().is_none());

        store
            .save_credentials(&Credentials::new("mario", "pw"))
            .await
            .unwrap();
        assert_eq!(
            store.load_credentials().await.unwrap(),
            Some(Credentials::new("mario", "pw"))
        );

        store.clear_credentials().await.unwrap();
        assert!(store.load_credentials().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_profile_merge() {
        let store = MemoryCredentialStore::new();
        store
            .update_profile(ProfileUpdate {
                display_name: Some("Lucia".to_string()),
                profile_image: Some("a.png".to_string()),
            })
            .await
            .unwrap();

        let updated = store
            .update_profile(ProfileUpdate {
                display_name: Some("Lucia B.".to_string()),
                profile_image: None,
            })
            .await
            .unwrap();

        assert_eq!(updated.display_name, "Lucia B.");
        assert_eq!(updated.profile_image.as_deref(), Some("a.png"));
    }
}
