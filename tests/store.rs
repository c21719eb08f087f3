// ABOUTME: Integration tests for on-disk status retention.
// ABOUTME: Tests save/load/list and state directory resolution.

use meshvm::deploy::{DeploymentStatus, Resource};
use meshvm::error::Error;
use meshvm::store::StatusStore;
use meshvm::types::InstanceName;
use std::path::PathBuf;

fn status(name: &str) -> DeploymentStatus {
    let mut status = DeploymentStatus::new(InstanceName::new(name).unwrap());
    status.resources.record(Resource::instance(name));
    status
}

#[test]
fn save_then_load_preserves_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let store = StatusStore::new(dir.path());

    let path = store.save(&status("web-01")).unwrap();
    assert_eq!(path, dir.path().join("web-01.json"));

    let loaded = store.load(&InstanceName::new("web-01").unwrap()).unwrap();
    assert_eq!(loaded.name.as_str(), "web-01");
    assert_eq!(loaded.resources.entries(), &[Resource::instance("web-01")]);
}

#[test]
fn save_replaces_earlier_status() {
    let dir = tempfile::tempdir().unwrap();
    let store = StatusStore::new(dir.path());
    store.save(&status("web-01")).unwrap();

    let mut updated = status("web-01");
    updated.resources.mark_released(0);
    store.save(&updated).unwrap();

    let loaded = store.load(&InstanceName::new("web-01").unwrap()).unwrap();
    assert!(loaded.resources.all_released());
}

#[test]
fn missing_status_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let store = StatusStore::new(dir.path());
    let err = store.load(&InstanceName::new("ghost").unwrap()).unwrap_err();
    assert!(matches!(err, Error::StatusNotFound(name) if name == "ghost"));
}

#[test]
fn list_is_sorted_and_skips_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let store = StatusStore::new(dir.path());
    store.save(&status("web-02")).unwrap();
    store.save(&status("web-01")).unwrap();
    std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let names: Vec<_> = store
        .list()
        .unwrap()
        .into_iter()
        .map(|s| s.name.to_string())
        .collect();
    assert_eq!(names, vec!["web-01", "web-02"]);
}

#[test]
fn list_of_missing_directory_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = StatusStore::new(dir.path().join("nope"));
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn default_location_prefers_xdg_state_home() {
    temp_env::with_vars(
        [
            ("XDG_STATE_HOME", Some("/var/lib/state")),
            ("HOME", Some("/home/ops")),
        ],
        || {
            let store = StatusStore::default_location().unwrap();
            assert_eq!(store.dir(), PathBuf::from("/var/lib/state/meshvm"));
        },
    );
}

#[test]
fn default_location_falls_back_to_home() {
    temp_env::with_vars(
        [("XDG_STATE_HOME", None), ("HOME", Some("/home/ops"))],
        || {
            let store = StatusStore::default_location().unwrap();
            assert_eq!(store.dir(), PathBuf::from("/home/ops/.local/state/meshvm"));
        },
    );
}

#[test]
fn default_location_needs_home() {
    temp_env::with_vars_unset(["XDG_STATE_HOME", "HOME"], || {
        assert!(matches!(
            StatusStore::default_location(),
            Err(Error::NoStateDir)
        ));
    });
}
