// CBR sessions driven end to end through the retry driver

use vabrc::engine::{BrcEngine, BrcStatus, Disposition, EncodeDriver, SliceType};

use crate::common::helpers::*;

// ============================================================================
// Initial state
// ============================================================================

#[test]
fn test_hd_two_megabit_initial_state() {
    let config = cbr_config(2_000_000);
    let engine = BrcEngine::with_config(&config).unwrap();
    let brc = engine.brc(0).unwrap();
    let hrd = engine.hrd(0).unwrap();

    assert!(brc.target_frame_size.i > brc.target_frame_size.p);
    assert!(brc.qp.i <= 36);
    assert!(brc.qp.p <= 40);
    assert_eq!(hrd.buffer_size, 16_000_000.0);
}

#[test]
fn test_explicit_buffer_clamped_to_bitrate_range() {
    let mut config = cbr_config(2_000_000);

    config.hrd_buffer_size = 1_000;
    let engine = BrcEngine::with_config(&config).unwrap();
    assert_eq!(engine.hrd(0).unwrap().buffer_size, 2_000_000.0);

    config.hrd_buffer_size = 1_000_000_000;
    let engine = BrcEngine::with_config(&config).unwrap();
    assert_eq!(engine.hrd(0).unwrap().buffer_size, 64_000_000.0);

    config.hrd_buffer_size = 6_000_000;
    let engine = BrcEngine::with_config(&config).unwrap();
    assert_eq!(engine.hrd(0).unwrap().buffer_size, 6_000_000.0);
    assert_eq!(engine.hrd(0).unwrap().current_buffer_fullness, 3_000_000.0);
}

// ============================================================================
// Closed loop
// ============================================================================

#[test]
fn test_steady_content_converges_without_violations() {
    let config = cbr_config(2_000_000);
    let mut driver = EncodeDriver::with_config(&config, quiet_pipeline(&config)).unwrap();
    let outcomes = run_frames(&mut driver, &config, 600);

    assert!(
        outcomes
            .iter()
            .all(|o| o.disposition == Disposition::Accepted)
    );
    assert_qps_in_range(driver.engine(), 1, 51);

    let achieved = bitrate_of(&outcomes[300..], 30.0);
    assert!(
        (1_500_000.0..=2_500_000.0).contains(&achieved),
        "achieved {} bit/s",
        achieved
    );

    // P-frame QP settles into a narrow band
    let p_qps: Vec<u8> = outcomes[500..]
        .iter()
        .filter(|o| o.slice_type == SliceType::P)
        .map(|o| o.qp())
        .collect();
    let min = p_qps.iter().min().unwrap();
    let max = p_qps.iter().max().unwrap();
    assert!(max - min <= 4, "P qp spread {}..{}", min, max);
}

#[test]
fn test_qp_tracks_bitrate() {
    let low = cbr_config(1_000_000);
    let high = cbr_config(8_000_000);

    let mut low_driver = EncodeDriver::with_config(&low, quiet_pipeline(&low)).unwrap();
    let mut high_driver = EncodeDriver::with_config(&high, quiet_pipeline(&high)).unwrap();
    let low_out = run_frames(&mut low_driver, &low, 300);
    let high_out = run_frames(&mut high_driver, &high, 300);

    assert!(low_out[299].qp() > high_out[299].qp());
}

#[test]
fn test_frames_on_target_hold_qp() {
    let mut config = cbr_config(2_000_000);
    config.initial_qp = Some(30);
    let mut engine = BrcEngine::with_config(&config).unwrap();
    let target = engine.brc(0).unwrap().target_frame_size.p as u32;

    let mut qp_prev = engine.current_qp(0, SliceType::P).unwrap();
    for _ in 0..60 {
        let status = engine.postpack(0, SliceType::P, target).unwrap();
        assert_eq!(status, BrcStatus::NoViolation);
        engine.hrd_context_update();

        let qp = engine.current_qp(0, SliceType::P).unwrap();
        assert!(qp.abs_diff(qp_prev) <= 1);
        qp_prev = qp;
    }
}

#[test]
fn test_underflow_recovery_from_qp_26() {
    let mut config = cbr_config(2_000_000);
    config.initial_qp = Some(26);
    let mut engine = BrcEngine::with_config(&config).unwrap();
    engine.layers_mut().hrd[0].current_buffer_fullness = 50_000.0;
    let huge = (engine.brc(0).unwrap().target_frame_size.p * 10.0) as u32;

    let mut qp_prev = 26;
    let mut status = BrcStatus::Underflow;
    let mut calls = 0;
    while status == BrcStatus::Underflow {
        status = engine.postpack(0, SliceType::P, huge).unwrap();
        let qp = engine.current_qp(0, SliceType::P).unwrap();
        assert!(qp > qp_prev || qp == 51, "qp went {} -> {}", qp_prev, qp);
        qp_prev = qp;
        calls += 1;
        assert!(calls < 60);
    }

    assert_eq!(status, BrcStatus::UnderflowAtMaxQp);
    assert_eq!(qp_prev, 51);
    // nothing was charged to the buffer
    assert_eq!(engine.hrd(0).unwrap().current_buffer_fullness, 50_000.0);
}

#[test]
fn test_hrd_timing_counts_accepted_frames() {
    let config = cbr_config(2_000_000);
    let mut driver = EncodeDriver::with_config(&config, quiet_pipeline(&config)).unwrap();
    run_frames(&mut driver, &config, 45);

    let timing = driver.engine().timing().unwrap();
    assert_eq!(timing.frame_number, 45);
    assert_eq!(timing.current_cpb_removal_delay(), 90);
}
