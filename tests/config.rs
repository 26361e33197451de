use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;

use bms_repack::config::{Config, ConfigLoader, MissingArchivePolicy};
use bms_repack::error::RepackError;
use bms_repack::existence::ExistencePredicate;

#[test]
fn parse_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("bms-repack.json");
    fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "facility": "S40",
            "existence": "more_than_one",
            "on_missing_archive": "skip",
            "header_block": false,
            "repository": { "base_url": "https://repo.example.org/", "timeout_secs": 30 },
            "publish": { "enabled": true, "type": "PROCESSED", "experiment_id": "12" },
            "notify": {
                "api_url": "https://send.api.mailtrap.io/api/send",
                "from": "bms@example.org",
                "to": ["ops@example.org"]
            }
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.facility, "S40");
    assert_eq!(resolved.archive_prefix, "BMS_S40");
    assert_eq!(resolved.room_file_prefix, "hawk-s40_ac_room_");
    assert_eq!(resolved.existence, ExistencePredicate::MoreThanOne);
    assert_eq!(resolved.on_missing_archive, MissingArchivePolicy::Skip);
    assert!(!resolved.header_block);
    assert_eq!(resolved.repository.timeout, Duration::from_secs(30));
    assert_eq!(
        resolved.repository.create_url(),
        "https://repo.example.org/data_files/api_create"
    );
    assert!(resolved.publish.enabled);
    assert_eq!(resolved.publish.experiment_id, "12");

    let notify = resolved.notify.unwrap();
    assert_eq!(notify.api_key_env, "MAILTRAP_API_KEY");
    assert_eq!(notify.subject_prefix, "[S40 BMS repack]");
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, RepackError::ConfigRead(_));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("bms-repack.json");
    fs::write(&path, "{ \"facility\": 39 }").unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, RepackError::ConfigParse(_));
}

#[test]
fn empty_timestamp_formats_fall_back_to_defaults() {
    let config = Config {
        timestamp_formats: Some(Vec::new()),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.timestamp_formats[0], "%d/%m/%Y %H:%M:%S");
    assert_eq!(resolved.staging_dir, "raw_data");
    assert_eq!(resolved.output_dir, "output_data");
}
