//! Durability tests for the JSON-backed patch store.

use raspmidi_core::PatchFields;
use raspmidi_store::{Error, PatchOrder, PatchStore};
use serde_json::json;
use tempfile::tempdir;

fn effects_patch(name: &str, channel: i64) -> PatchFields {
    serde_json::from_value(json!({
        "name": name,
        "input_device": "Chocolate",
        "output_device": "zoom_g3x",
        "command_type": "effects_config",
        "input_channel": channel,
        "zoom_bank": "C",
        "zoom_slot": channel,
        "effects": {
            "effect_1": {"enabled": true},
            "effect_3": {"enabled": false},
        },
    }))
    .unwrap()
}

/// Patches, ids and the id counter survive a reopen.
#[test]
fn test_reopen_restores_patches_and_counter() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data").join("patches.json");

    let (kept, deleted) = {
        let store = PatchStore::open(&path).unwrap();
        let kept = store.create(&effects_patch("Lead", 1)).unwrap();
        let deleted = store.create(&effects_patch("Rhythm", 2)).unwrap();
        store.delete(deleted.id).unwrap();
        (kept, deleted)
    };
    assert!(path.exists());

    let store = PatchStore::open(&path).unwrap();
    let patches = store.list(PatchOrder::Insertion);
    assert_eq!(patches, vec![kept.clone()]);

    let next = store.create(&effects_patch("Solo", 3)).unwrap();
    assert!(next.id > deleted.id);

    // Uniqueness still holds against reloaded data.
    assert!(matches!(
        store.create(&effects_patch("Copy", 1)),
        Err(Error::DuplicateChannel { .. })
    ));
}

/// The active patch is restored on reopen, and files without one still load.
#[test]
fn test_active_patch_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("patches.json");
    let at = chrono::Utc::now();

    let lead = {
        let store = PatchStore::open(&path).unwrap();
        let lead = store.create(&effects_patch("Lead", 1)).unwrap();
        store.set_active(lead.id, at).unwrap();
        lead
    };

    let store = PatchStore::open(&path).unwrap();
    let (patch, activated_at) = store.active().unwrap();
    assert_eq!(patch, lead);
    assert_eq!(activated_at, at);

    std::fs::write(&path, r#"{"next_id": 3, "patches": []}"#).unwrap();
    let store = PatchStore::open(&path).unwrap();
    assert!(store.active().is_none());
}

/// A failed write leaves memory unchanged.
#[test]
fn test_failed_persist_rolls_back() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let store = PatchStore::open(blocker.join("patches.json")).unwrap();
    let err = store.create(&effects_patch("Lead", 1)).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert!(store.is_empty());
    assert!(store.used_channels().is_empty());
}

#[test]
fn test_corrupt_file_is_reported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("patches.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = PatchStore::open(&path).unwrap_err();
    assert!(matches!(err, Error::Serialization(_)));
}

#[test]
fn test_empty_file_starts_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("patches.json");
    std::fs::write(&path, "").unwrap();

    let store = PatchStore::open(&path).unwrap();
    assert!(store.is_empty());
    let patch = store.create(&effects_patch("Lead", 1)).unwrap();
    assert_eq!(patch.id, 1);
}
