#![allow(dead_code)] // Not every test binary uses every helper

use vabrc::config::{GopStructure, LayerConfig, RateControlConfig};
use vabrc::engine::{
    BrcEngine, EncodeDriver, EncodePipeline, FrameOutcome, RcMode, SliceType, SyntheticPipeline,
};

/// Single-layer 1080p stream at `bitrate`, 30 fps, all-P GOP of 30.
pub fn cbr_config(bitrate: u64) -> RateControlConfig {
    RateControlConfig {
        layers: vec![LayerConfig::new(bitrate, 30, 1)],
        ..RateControlConfig::default()
    }
}

pub fn vbr_config(bitrate: u64) -> RateControlConfig {
    RateControlConfig {
        mode: RcMode::Vbr,
        ..cbr_config(bitrate)
    }
}

/// Two temporal layers at 15 + 15 fps splitting 2 Mbps 60/40.
pub fn two_layer_config() -> RateControlConfig {
    RateControlConfig {
        gop: GopStructure::new(32, 1, 31, 0),
        layers: vec![
            LayerConfig::new(1_200_000, 15, 1),
            LayerConfig::new(2_000_000, 30, 1),
        ],
        layer_pattern: vec![0, 1],
        ..RateControlConfig::default()
    }
}

/// Synthetic encoder without noise, so runs are exactly repeatable.
pub fn quiet_pipeline(config: &RateControlConfig) -> SyntheticPipeline {
    SyntheticPipeline::new(config, 0).with_noise(0.0)
}

/// Encode `frames` pictures following the configured GOP.
pub fn run_frames<P: EncodePipeline>(
    driver: &mut EncodeDriver<P>,
    config: &RateControlConfig,
    frames: u64,
) -> Vec<FrameOutcome> {
    (0..frames)
        .map(|index| {
            driver
                .encode_frame(config.gop.slice_type_at(index))
                .expect("encode should not fail")
        })
        .collect()
}

/// Every QP of every layer lies in `[min, max]`.
pub fn assert_qps_in_range(engine: &BrcEngine, min: u8, max: u8) {
    for (layer, brc) in engine.layers().brc.iter().enumerate() {
        for slice_type in SliceType::ALL {
            let qp = brc.qp[slice_type];
            assert!(
                (min..=max).contains(&qp),
                "layer {} {} qp {} outside {}..={}",
                layer,
                slice_type,
                qp,
                min,
                max
            );
        }
    }
}

/// Average bits per second over `outcomes` at `framerate`.
pub fn bitrate_of(outcomes: &[FrameOutcome], framerate: f64) -> f64 {
    let bits: u64 = outcomes.iter().map(|o| u64::from(o.bits)).sum();
    bits as f64 * framerate / outcomes.len() as f64
}
