//! Configuration compatibility between openers of one path

use std::sync::Arc;
use std::thread;

use aerodb_coordinator::{
    ConfigField, CoordinatorError, CoordinatorRegistry, StoreConfig, NOT_VERSIONED,
};

fn config(path: &str) -> StoreConfig {
    StoreConfig::new(path).in_memory(true)
}

fn expect_mismatch(result: Result<Arc<aerodb_coordinator::StoreHandle>, CoordinatorError>) -> ConfigField {
    match result {
        Err(CoordinatorError::ConfigMismatch { field, .. }) => field,
        other => panic!("expected a config mismatch, got {:?}", other),
    }
}

#[test]
fn test_read_only_mismatch_is_rejected() {
    let registry = CoordinatorRegistry::new();
    let coordinator = registry.get_coordinator("compat-read-only");
    let _writer = coordinator.get_store_handle(config("compat-read-only")).unwrap();

    let field = expect_mismatch(
        coordinator.get_store_handle(config("compat-read-only").read_only(true)),
    );
    assert_eq!(field, ConfigField::ReadOnly);

    // The established configuration is untouched by the rejected opener
    assert!(!coordinator.config().unwrap().read_only);
}

#[test]
fn test_mismatch_error_names_path_and_field() {
    let registry = CoordinatorRegistry::new();
    let coordinator = registry.get_coordinator("compat-message");
    let _first = coordinator.get_store_handle(config("compat-message")).unwrap();

    let err = coordinator
        .get_store_handle(config("compat-message").read_only(true))
        .unwrap_err();
    assert!(err.is_config_conflict());
    assert_eq!(err.code(), "AERO_COORDINATOR_CONFIG_MISMATCH");
    let message = err.to_string();
    assert!(message.contains("compat-message"));
    assert!(message.contains("read permissions"));
}

#[test]
fn test_same_thread_reuses_cached_handle() {
    let registry = CoordinatorRegistry::new();
    let coordinator = registry.get_coordinator("compat-cache");
    let first = coordinator.get_store_handle(config("compat-cache")).unwrap();
    let second = coordinator.get_store_handle(config("compat-cache")).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_other_thread_gets_its_own_handle() {
    let registry = CoordinatorRegistry::new();
    let coordinator = registry.get_coordinator("compat-threads");
    let local = coordinator.get_store_handle(config("compat-threads")).unwrap();

    let remote_coordinator = Arc::clone(&coordinator);
    let remote = thread::spawn(move || {
        let handle = remote_coordinator
            .get_store_handle(config("compat-threads"))
            .unwrap();
        let again = remote_coordinator
            .get_store_handle(config("compat-threads"))
            .unwrap();
        assert!(Arc::ptr_eq(&handle, &again));
        handle.id()
    })
    .join()
    .unwrap();

    assert_ne!(local.id(), remote);
}

#[test]
fn test_closed_cached_handle_is_not_returned() {
    let registry = CoordinatorRegistry::new();
    let coordinator = registry.get_coordinator("compat-closed");
    let first = coordinator.get_store_handle(config("compat-closed")).unwrap();
    first.close();

    let second = coordinator.get_store_handle(config("compat-closed")).unwrap();
    assert!(!second.is_closed());
    assert_ne!(first.id(), second.id());
}

#[test]
fn test_encryption_key_mismatch() {
    let registry = CoordinatorRegistry::new();
    let coordinator = registry.get_coordinator("compat-key");
    let _first = coordinator
        .get_store_handle(config("compat-key").encryption_key(vec![7u8; 64]))
        .unwrap();

    let field = expect_mismatch(
        coordinator.get_store_handle(config("compat-key").encryption_key(vec![8u8; 64])),
    );
    assert_eq!(field, ConfigField::EncryptionKey);

    let field = expect_mismatch(coordinator.get_store_handle(config("compat-key")));
    assert_eq!(field, ConfigField::EncryptionKey);

    coordinator
        .get_store_handle(config("compat-key").encryption_key(vec![7u8; 64]))
        .unwrap();
}

#[test]
fn test_schema_version_mismatch() {
    let registry = CoordinatorRegistry::new();
    let coordinator = registry.get_coordinator("compat-version");
    let _first = coordinator
        .get_store_handle(config("compat-version").schema_version(3))
        .unwrap();

    let field = expect_mismatch(
        coordinator.get_store_handle(config("compat-version").schema_version(4)),
    );
    assert_eq!(field, ConfigField::SchemaVersion);
    assert_eq!(coordinator.schema_version(), Some(3));
}

#[test]
fn test_unversioned_opener_accepts_any_version() {
    let registry = CoordinatorRegistry::new();
    let coordinator = registry.get_coordinator("compat-unversioned");
    let _first = coordinator
        .get_store_handle(config("compat-unversioned").schema_version(3))
        .unwrap();

    let handle = coordinator
        .get_store_handle(
            config("compat-unversioned")
                .schema_version(NOT_VERSIONED)
                .cache(false),
        )
        .unwrap();
    assert!(!handle.is_closed());
}

#[test]
fn test_config_from_json_opens_like_builder() {
    let registry = CoordinatorRegistry::new();
    let coordinator = registry.get_coordinator("compat-json");
    let parsed = StoreConfig::from_json(r#"{"path": "compat-json", "in_memory": true}"#).unwrap();
    assert_eq!(parsed, config("compat-json"));

    let first = coordinator.get_store_handle(parsed).unwrap();
    let second = coordinator.get_store_handle(config("compat-json")).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}
