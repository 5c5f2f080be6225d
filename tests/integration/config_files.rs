// Config files on disk

use std::fs;
use vabrc::config::RateControlConfig;
use vabrc::engine::{Codec, RcMode};

use crate::common::helpers::*;

#[test]
fn test_save_and_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vabrc").join("rc.toml");

    let mut config = two_layer_config();
    config.codec = Codec::Hevc;
    config.initial_qp = Some(28);
    config.save(&path).unwrap();

    let loaded = RateControlConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_minimal_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rc.toml");
    fs::write(
        &path,
        r#"
mode = "vbr"
width = 1280
height = 720

[[layers]]
bitrate = 3000000
framerate_num = 60
"#,
    )
    .unwrap();

    let config = RateControlConfig::load(&path).unwrap();
    assert_eq!(config.mode, RcMode::Vbr);
    assert_eq!(config.codec, Codec::Avc);
    assert_eq!(config.bit_depth, 8);
    assert_eq!(config.max_attempts, 4);
    assert_eq!(config.layer_pattern, vec![0]);
    assert_eq!(config.layers[0].framerate(), 60.0);
    assert_eq!(config.gop.size, 30);
}

#[test]
fn test_invalid_file_reports_path_and_reason() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rc.toml");
    let mut config = two_layer_config();
    config.mode = RcMode::Vbr;
    fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

    let err = RateControlConfig::load(&path).unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("Invalid rate control config"));
    assert!(message.contains("single temporal layer"));
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = RateControlConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to read config file"));
}

#[test]
fn test_unknown_mode_string_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rc.toml");
    fs::write(
        &path,
        r#"
mode = "cqp"
width = 1280
height = 720

[[layers]]
bitrate = 3000000
framerate_num = 30
"#,
    )
    .unwrap();

    assert!(RateControlConfig::load(&path).is_err());
}
