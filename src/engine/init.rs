//! Sequence-level initialisation of the per-layer rate-control state.
//!
//! Every temporal layer gets its own bit budget: the increment of its cumulative
//! bitrate/framerate over the layer below. From that budget we derive per-slice
//! target sizes, a first QP guess and the HRD buffer geometry.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::hrd::HrdState;
use super::types::{
    BRC_BWEIGHT, BRC_INIT_MAX_QP_B, BRC_INIT_MAX_QP_I, BRC_INIT_MAX_QP_P, BRC_PWEIGHT,
    HRD_DEFAULT_SECONDS, HRD_MAX_SECONDS, HRD_MIN_SECONDS, PerSlice, RcMode, SliceType,
};
use crate::config::{ConfigError, RateControlConfig};

/// Predictor state of one temporal layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrcState {
    pub qp: PerSlice<u8>,
    pub target_frame_size: PerSlice<f64>,
    /// Frames of each type this layer contributes to one GOP.
    pub gop_nums: PerSlice<u32>,
    /// Fractional QP prediction error carried between frames.
    pub qpf_rounding_accumulator: f64,
    /// Bitrate increment of this layer (bits per second).
    pub bitrate: f64,
    /// Framerate increment of this layer.
    pub framerate: f64,
}

/// Bits a frame is expected to take at QP=1 and at the QP ceiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QpSizeModel {
    pub qp1_size: f64,
    pub qp51_size: f64,
}

impl QpSizeModel {
    pub fn for_config(config: &RateControlConfig) -> Self {
        let raw_frame_bits = f64::from(config.width)
            * f64::from(config.height)
            * 1.5
            * f64::from(config.bit_depth);
        let layered = config.num_layers() > 1;

        Self {
            qp1_size: config.codec.qp1_ratio(layered) * raw_frame_bits,
            qp51_size: config.codec.qp51_ratio() * raw_frame_bits,
        }
    }

    /// Linear QP guess for a frame budget of `bits_per_frame`.
    pub fn interpolate_qp(&self, bits_per_frame: f64, max_qp: u8) -> i32 {
        let bpf = bits_per_frame.clamp(self.qp51_size, self.qp1_size);
        let span = self.qp1_size - self.qp51_size;
        if span <= 0.0 {
            return i32::from(max_qp);
        }
        let max = f64::from(max_qp);
        let qp = max - (max - 1.0) * (bpf - self.qp51_size) / span;
        ((qp + 0.5).floor() as i32).clamp(1, i32::from(max_qp))
    }
}

/// HRD buffer size for the whole stream, in bits.
pub fn total_buffer_size(config: &RateControlConfig) -> f64 {
    let bitrate = config.top_bitrate() as f64;
    if config.hrd_buffer_size == 0 {
        bitrate * HRD_DEFAULT_SECONDS
    } else {
        (config.hrd_buffer_size as f64).clamp(bitrate * HRD_MIN_SECONDS, bitrate * HRD_MAX_SECONDS)
    }
}

/// Initial HRD fullness for the whole stream, in bits.
pub fn total_initial_fullness(config: &RateControlConfig, buffer_size: f64) -> f64 {
    if config.hrd_initial_fullness == 0 {
        buffer_size / 2.0
    } else {
        (config.hrd_initial_fullness as f64).min(buffer_size)
    }
}

/// Build the HRD and predictor state of every temporal layer, lowest first.
pub fn init_layers(
    config: &RateControlConfig,
) -> Result<(Vec<HrdState>, Vec<BrcState>), ConfigError> {
    config.validate()?;

    let model = QpSizeModel::for_config(config);
    let min_qp = i32::from(config.effective_min_qp());
    let max_qp = config.max_qp();
    let top_bitrate = config.top_bitrate() as f64;
    let top_framerate = config.layers.last().map(|l| l.framerate()).unwrap_or(0.0);
    let layered = config.num_layers() > 1;

    let buffer_total = total_buffer_size(config);
    let fullness_total = total_initial_fullness(config, buffer_total);

    let mut hrds = Vec::with_capacity(config.num_layers());
    let mut brcs = Vec::with_capacity(config.num_layers());

    // Cumulative GOP share of the layers processed so far.
    let mut prev_period = 0u32;
    let mut prev_pnum = 0u32;

    for (idx, layer) in config.layers.iter().enumerate() {
        let (mut bitrate, framerate) = match idx {
            0 => (layer.bitrate as f64, layer.framerate()),
            _ => {
                let below = &config.layers[idx - 1];
                (
                    (layer.bitrate - below.bitrate) as f64,
                    layer.framerate() - below.framerate(),
                )
            }
        };

        if config.mode == RcMode::Vbr && layer.target_percentage > 0 {
            bitrate = bitrate * f64::from(layer.target_percentage) / 100.0;
        }

        let (period, gop_nums) = if layered {
            let factor = layer.framerate() / top_framerate;
            let cum_period = (f64::from(config.gop.size) * factor) as u32;
            let cum_pnum = (f64::from(config.gop.p_frames) * factor) as u32;
            let period = cum_period.saturating_sub(prev_period);
            let inum = u32::from(idx == 0);
            let pnum = cum_pnum.saturating_sub(prev_pnum);
            let bnum = period.saturating_sub(inum + pnum);
            prev_period = cum_period;
            prev_pnum = cum_pnum;
            (
                period,
                PerSlice {
                    i: inum,
                    p: pnum,
                    b: bnum,
                },
            )
        } else {
            (
                config.gop.size,
                PerSlice {
                    i: config.gop.i_frames,
                    p: config.gop.p_frames,
                    b: config.gop.b_frames,
                },
            )
        };

        let weighted = f64::from(gop_nums.i)
            + BRC_PWEIGHT * f64::from(gop_nums.p)
            + BRC_BWEIGHT * f64::from(gop_nums.b);
        let bits_per_frame = bitrate / framerate;
        let target_i = if weighted > 0.0 && period > 0 {
            bitrate * f64::from(period) / framerate / weighted
        } else {
            bits_per_frame
        };
        let target_frame_size = PerSlice {
            i: target_i,
            p: BRC_PWEIGHT * target_i,
            b: BRC_BWEIGHT * target_i,
        };

        let qp = match config.initial_qp {
            Some(forced) => PerSlice::splat(forced.clamp(config.effective_min_qp(), max_qp)),
            None => {
                let guess = model.interpolate_qp(bits_per_frame, max_qp);
                PerSlice {
                    i: guess.min(BRC_INIT_MAX_QP_I).max(min_qp) as u8,
                    p: guess.min(BRC_INIT_MAX_QP_P).max(min_qp) as u8,
                    b: guess.min(BRC_INIT_MAX_QP_B).max(min_qp) as u8,
                }
            }
        };

        let hrd_factor = bitrate / top_bitrate;
        let buffer_size = buffer_total * hrd_factor;
        let hrd = HrdState {
            buffer_size,
            current_buffer_fullness: fullness_total * hrd_factor,
            target_buffer_fullness: buffer_size / 2.0,
            buffer_capacity: buffer_size / model.qp1_size,
            bits_per_frame,
            violation_noted: false,
        };

        info!(
            layer = idx,
            mode = %config.mode,
            bitrate,
            framerate,
            target_i = target_frame_size[SliceType::I],
            target_p = target_frame_size[SliceType::P],
            target_b = target_frame_size[SliceType::B],
            qp_i = qp.i,
            qp_p = qp.p,
            qp_b = qp.b,
            buffer_size,
            "initialized rate control layer"
        );

        hrds.push(hrd);
        brcs.push(BrcState {
            qp,
            target_frame_size,
            gop_nums,
            qpf_rounding_accumulator: 0.0,
            bitrate,
            framerate,
        });
    }

    Ok((hrds, brcs))
}
