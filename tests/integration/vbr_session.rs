// VBR sessions

use vabrc::engine::{
    BrcEngine, BrcStatus, Disposition, EncodeDriver, PictureRequest, SliceType,
    SyntheticPipeline,
};

use crate::common::helpers::*;

#[test]
fn test_scene_change_guard() {
    let config = vbr_config(2_000_000);
    let mut engine = BrcEngine::with_config(&config).unwrap();
    {
        let layers = engine.layers_mut();
        layers.brc[0].target_frame_size.p = 10_000.0;
        let hrd = &mut layers.hrd[0];
        hrd.current_buffer_fullness = hrd.target_buffer_fullness / 4.0;
    }
    let qp_prev = engine.current_qp(0, SliceType::P).unwrap();

    let status = engine.postpack(0, SliceType::P, 100_000).unwrap();
    assert_eq!(status, BrcStatus::NoViolation);

    // 1 + round(2 ln 10)
    let qp = engine.current_qp(0, SliceType::P).unwrap();
    assert_eq!(qp, (qp_prev + 6).min(51));
    assert!(qp <= 51);
}

#[test]
fn test_scene_change_guard_clamps_at_51() {
    let mut config = vbr_config(2_000_000);
    config.initial_qp = Some(49);
    let mut engine = BrcEngine::with_config(&config).unwrap();
    {
        let layers = engine.layers_mut();
        layers.brc[0].target_frame_size.p = 10_000.0;
        let hrd = &mut layers.hrd[0];
        hrd.current_buffer_fullness = hrd.target_buffer_fullness / 4.0;
    }

    engine.postpack(0, SliceType::P, 100_000).unwrap();
    assert_eq!(engine.current_qp(0, SliceType::P), Some(51));
    assert_eq!(engine.current_qp(0, SliceType::B), Some(51));
    assert_eq!(engine.current_qp(0, SliceType::I), Some(51));
}

#[test]
fn test_vbr_has_no_timing() {
    let engine = BrcEngine::with_config(&vbr_config(2_000_000)).unwrap();
    assert!(engine.timing().is_none());
}

#[test]
fn test_vbr_session_with_scene_changes() {
    let config = vbr_config(2_000_000);
    let pipeline = SyntheticPipeline::new(&config, 11).with_scene_changes(60, 6.0);
    let mut driver = EncodeDriver::with_config(&config, pipeline).unwrap();
    let outcomes = run_frames(&mut driver, &config, 300);

    assert_eq!(outcomes.len(), 300);
    assert_qps_in_range(driver.engine(), 1, 51);
    assert!(
        outcomes
            .iter()
            .all(|o| o.disposition != Disposition::RetryLimit || o.attempts() == 4)
    );

    let hrd = driver.engine().hrd(0).unwrap();
    assert!(hrd.current_buffer_fullness > 0.0);
    assert!(hrd.current_buffer_fullness <= hrd.buffer_size);
}

#[test]
fn test_vbr_overfill_never_overflows() {
    // tiny frames keep the buffer pinned at the top
    let config = vbr_config(2_000_000);
    let tiny = |_: &PictureRequest, _: u8| -> anyhow::Result<u32> { Ok(1_000) };
    let mut driver = EncodeDriver::with_config(&config, tiny).unwrap();
    let outcomes = run_frames(&mut driver, &config, 200);

    assert!(outcomes.iter().all(|o| o.status == BrcStatus::NoViolation));
    let hrd = driver.engine().hrd(0).unwrap();
    assert_eq!(hrd.current_buffer_fullness, hrd.buffer_size);
    // headroom lets QP walk down to the floor
    assert_eq!(driver.engine().current_qp(0, SliceType::P), Some(1));
}
