//! File-backed credential store tests

use gatelink::credentials::{
    CredentialStore, Credentials, FileCredentialStore, ProfileUpdate, StoreError,
};
use tempfile::TempDir;

fn store() -> (TempDir, FileCredentialStore) {
    let dir = TempDir::new().unwrap();
    let store = FileCredentialStore::new(dir.path().join("gatelink"));
    (dir, store)
}

#[tokio::test]
async fn test_missing_entries_load_as_none() {
    let (_dir, store) = store();
    assert!(store.load_credentials().await.unwrap().is_none());
    assert!(store.load_profile().await.unwrap().is_none());
    store.clear_credentials().await.unwrap();
}

#[tokio::test]
async fn test_credentials_persist_across_store_instances() {
    let (_dir, store) = store();
    store
        .save_credentials(&Credentials::new("mario", "s3cret"))
        .await
        .unwrap();

    let reopened = FileCredentialStore::new(store.dir());
    assert_eq!(
        reopened.load_credentials().await.unwrap(),
        Some(Credentials::new("mario", "s3cret"))
    );

    reopened.clear_credentials().await.unwrap();
    assert!(store.load_credentials().await.unwrap().is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_entries_are_private() {
    use std::os::unix::fs::PermissionsExt;

    let (_dir, store) = store();
    store
        .save_credentials(&Credentials::new("mario", "s3cret"))
        .await
        .unwrap();

    let metadata = std::fs::metadata(store.dir().join("user.json")).unwrap();
    assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
}

#[tokio::test]
async fn test_corrupted_entry_is_reported() {
    let (_dir, store) = store();
    std::fs::create_dir_all(store.dir()).unwrap();
    std::fs::write(store.dir().join("user.json"), "{not json").unwrap();

    let result = store.load_credentials().await;
    assert!(matches!(
        result,
        Err(StoreError::Corrupted {
            entry: "user.json",
            ..
        })
    ));
}

#[tokio::test]
async fn test_incomplete_stored_credentials_are_ignored() {
    let (_dir, store) = store();
    std::fs::create_dir_all(store.dir()).unwrap();
    std::fs::write(
        store.dir().join("user.json"),
        r#"{"username":"mario","password":""}"#,
    )
    .unwrap();

    assert!(store.load_credentials().await.unwrap().is_none());
}

#[tokio::test]
async fn test_profile_update_merges_fields() {
    let (_dir, store) = store();

    let first = store
        .update_profile(ProfileUpdate {
            display_name: Some("Lucia".to_string()),
            profile_image: Some("avatar.png".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(first.author(), Some("Lucia"));

    let second = store
        .update_profile(ProfileUpdate {
            display_name: Some("Lucia B.".to_string()),
            profile_image: None,
        })
        .await
        .unwrap();
    assert_eq!(second.display_name, "Lucia B.");
    assert_eq!(second.profile_image.as_deref(), Some("avatar.png"));

    let raw = std::fs::read_to_string(store.dir().join("profile.json")).unwrap();
    assert!(raw.contains("displayName"));
    assert_eq!(store.load_profile().await.unwrap(), Some(second));
}
