// Encode-retry state machine against scripted encoders

use vabrc::engine::{
    BrcStatus, Disposition, DriverError, DriverState, EncodeDriver, PictureRequest, SliceType,
};

use crate::common::helpers::*;

#[test]
fn test_retries_until_frame_fits() {
    let mut config = cbr_config(2_000_000);
    config.initial_qp = Some(30);
    // only QP 45 and above shrink the picture enough to fit the buffer
    let encoder = |_: &PictureRequest, qp: u8| -> anyhow::Result<u32> {
        Ok(if qp >= 45 { 50_000 } else { 9_000_000 })
    };
    let mut driver = EncodeDriver::with_config(&config, encoder).unwrap();

    let outcome = driver.encode_frame(SliceType::I).unwrap();
    assert_eq!(outcome.qps, vec![30, 35, 40, 45]);
    assert_eq!(outcome.disposition, Disposition::Accepted);
    assert_eq!(outcome.bits, 50_000);
    assert_eq!(
        outcome
            .states
            .iter()
            .filter(|&&s| s == DriverState::RetryWithNewQp)
            .count(),
        3
    );
    assert_eq!(driver.engine().frames_accepted(), 1);
    assert_eq!(
        driver.engine().hrd(0).unwrap().current_buffer_fullness,
        8_000_000.0 - 50_000.0 + 2_000_000.0 / 30.0
    );
}

#[test]
fn test_latched_frame_counts_and_clears_on_recovery() {
    let mut config = cbr_config(2_000_000);
    config.initial_qp = Some(51);
    let encoder = |picture: &PictureRequest, _: u8| -> anyhow::Result<u32> {
        Ok(if picture.frame_number == 0 {
            20_000_000
        } else {
            1_000
        })
    };
    let mut driver = EncodeDriver::with_config(&config, encoder).unwrap();

    let first = driver.encode_frame(SliceType::I).unwrap();
    assert_eq!(first.status, BrcStatus::UnderflowAtMaxQp);
    assert_eq!(first.disposition, Disposition::Latched);
    assert!(driver.engine().hrd(0).unwrap().violation_noted);
    assert_eq!(driver.engine().frames_accepted(), 1);

    let second = driver.encode_frame(SliceType::P).unwrap();
    assert_eq!(second.disposition, Disposition::Accepted);
    assert!(!driver.engine().hrd(0).unwrap().violation_noted);
}

#[test]
fn test_overflow_at_min_qp_latches() {
    let mut config = cbr_config(2_000_000);
    config.initial_qp = Some(1);
    config.hrd_initial_fullness = 16_000_000;
    let empty = |_: &PictureRequest, _: u8| -> anyhow::Result<u32> { Ok(0) };
    let mut driver = EncodeDriver::with_config(&config, empty).unwrap();

    let outcome = driver.encode_frame(SliceType::P).unwrap();
    assert_eq!(outcome.status, BrcStatus::OverflowAtMinQp);
    assert_eq!(outcome.disposition, Disposition::Latched);
    assert_eq!(outcome.attempts(), 1);
}

#[test]
fn test_pipeline_failure_mid_retry_leaves_hrd_untouched() {
    let mut config = cbr_config(2_000_000);
    config.initial_qp = Some(30);
    let mut calls = 0;
    let flaky = move |_: &PictureRequest, _: u8| -> anyhow::Result<u32> {
        calls += 1;
        if calls == 1 {
            Ok(9_000_000)
        } else {
            anyhow::bail!("encoder hung")
        }
    };
    let mut driver = EncodeDriver::with_config(&config, flaky).unwrap();

    let err = driver.encode_frame(SliceType::I).unwrap_err();
    assert!(matches!(err, DriverError::Pipeline(_)));
    assert!(format!("{:#}", err).contains("encoder hung"));
    assert_eq!(driver.state(), DriverState::Idle);
    assert_eq!(driver.engine().frames_accepted(), 0);
    assert_eq!(
        driver.engine().hrd(0).unwrap().current_buffer_fullness,
        8_000_000.0
    );
}

#[test]
fn test_outcome_serializes_for_reports() {
    let config = cbr_config(2_000_000);
    let mut driver = EncodeDriver::with_config(&config, quiet_pipeline(&config)).unwrap();
    let outcome = driver.encode_frame(SliceType::I).unwrap();

    let value = serde_json::to_value(&outcome).unwrap();
    assert_eq!(value["disposition"], "accepted");
    assert_eq!(value["slice_type"], "i");
    assert_eq!(value["states"][0], "idle");
}
