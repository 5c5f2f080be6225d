// Temporal scalability: interleaved layers with their own budgets

use vabrc::engine::{BrcEngine, Disposition, EncodeDriver, SliceType};

use crate::common::helpers::*;

#[test]
fn test_layers_follow_the_pattern() {
    let config = two_layer_config();
    let mut driver = EncodeDriver::with_config(&config, quiet_pipeline(&config)).unwrap();
    let outcomes = run_frames(&mut driver, &config, 200);

    for (index, outcome) in outcomes.iter().enumerate() {
        assert_eq!(outcome.layer, index % 2, "frame {}", index);
        assert_eq!(outcome.frame_number, index as u64);
    }
    // the GOP's I frame always lands on the base layer
    assert!(
        outcomes
            .iter()
            .filter(|o| o.slice_type == SliceType::I)
            .all(|o| o.layer == 0)
    );
    assert_eq!(driver.engine().timing().unwrap().frame_number, 200);
}

#[test]
fn test_layered_session_stays_compliant() {
    let config = two_layer_config();
    let mut driver = EncodeDriver::with_config(&config, quiet_pipeline(&config)).unwrap();
    let outcomes = run_frames(&mut driver, &config, 400);

    assert!(
        outcomes
            .iter()
            .all(|o| o.disposition == Disposition::Accepted)
    );
    assert_qps_in_range(driver.engine(), 1, 51);

    for layer in 0..2 {
        let hrd = driver.engine().hrd(layer).unwrap();
        assert!(hrd.current_buffer_fullness > 0.0);
        assert!(hrd.current_buffer_fullness <= hrd.buffer_size);
    }
}

#[test]
fn test_layer_budgets_are_increments() {
    let engine = BrcEngine::with_config(&two_layer_config()).unwrap();
    let base = engine.brc(0).unwrap();
    let enhancement = engine.brc(1).unwrap();

    assert_eq!(base.bitrate + enhancement.bitrate, 2_000_000.0);
    assert_eq!(base.framerate + enhancement.framerate, 30.0);
    assert_eq!(enhancement.gop_nums.i, 0);

    let total: f64 = (0..2)
        .map(|layer| engine.hrd(layer).unwrap().buffer_size)
        .sum();
    assert!((total - 16_000_000.0).abs() < 1e-6);
}

#[test]
fn test_base_layer_retry_stays_on_base_layer() {
    let config = two_layer_config();
    let mut engine = BrcEngine::with_config(&config).unwrap();
    engine.layers_mut().hrd[0].current_buffer_fullness = 10_000.0;
    let qp_before = engine.current_qp(0, SliceType::I).unwrap();

    // underflow on layer 0: the correction goes to layer 0, not to the next layer
    engine.postpack(0, SliceType::I, 500_000).unwrap();
    assert!(engine.current_qp(0, SliceType::I).unwrap() > qp_before);
    assert_eq!(engine.current_layer(), 0);
}
