//! Constant bit-rate QP predictor.
//!
//! After each picture the QP of the next picture of the same slice type is
//! predicted from the ratio between its target size and a smoothed estimate of
//! the next frame size, then nudged by how far the HRD buffer sits from its
//! target fullness. Clean frames also pull the other two slice types of the
//! layer towards their expected offsets.

use std::f64::consts::FRAC_PI_2;

use tracing::debug;

use super::hrd::{HrdState, HrdUpdate};
use super::state::LayerStates;
use super::types::{
    BRC_I_B_QP_DIFF, BRC_I_P_QP_DIFF, BRC_P_B_QP_DIFF, BRC_QP_MAX_CHANGE, BrcStatus,
    FinishedFrame, MAX_FRAME_SIZE_ALPHA, MIN_BUFFER_CAPACITY, QpBounds, RcMode, SliceType,
};

/// Expected size of the next frame given how far the last one missed its target.
///
/// `alpha` spreads the miss over that many upcoming frames. The estimate never
/// drops below a quarter of the target.
pub fn predict_frame_size(target: f64, frame_bits: f64, alpha: f64) -> f64 {
    let next = target + (target - frame_bits) / (alpha + 1.0);
    next.max(target * 0.25)
}

/// Round a fractional QP prediction, carrying the rounding error over calls.
///
/// When rounding lands back on `qp_prev` the discarded fraction accumulates;
/// once it exceeds one whole step the QP moves by one and the accumulator
/// restarts.
pub fn round_with_accumulator(qpf: f64, qp_prev: i32, accumulator: &mut f64) -> i32 {
    let mut qpn = (qpf + 0.5).floor() as i32;
    if qpn == qp_prev {
        *accumulator += qpf - f64::from(qpn);
        if *accumulator > 1.0 {
            qpn += 1;
            *accumulator = 0.0;
        } else if *accumulator < -1.0 {
            qpn -= 1;
            *accumulator = 0.0;
        }
    }
    qpn
}

/// QP correction pulling the buffer back towards its target fullness.
///
/// Positive when the buffer is below target (frames are too big), negative
/// above it. The magnitude fades out as the buffer approaches either border.
pub fn fullness_correction(hrd: &HrdState) -> f64 {
    let mut x = hrd.target_buffer_fullness - hrd.current_buffer_fullness;
    let mut y;
    if x > 0.0 {
        x /= hrd.target_buffer_fullness;
        y = hrd.current_buffer_fullness;
    } else {
        x /= hrd.buffer_size - hrd.target_buffer_fullness;
        y = hrd.buffer_size - hrd.current_buffer_fullness;
    }
    if y < 0.01 {
        y = 0.01;
    }
    if !x.is_finite() {
        x = 0.0;
    }
    let x = x.clamp(-1.0, 1.0);

    f64::from(BRC_QP_MAX_CHANGE) * (-1.0 / y).exp() * (FRAC_PI_2 * x).sin()
}

/// GOP smoothing factor for `slice_type`, or 0 when the buffer is too small for
/// smoothing to mean anything.
fn frame_size_alpha(hrd: &HrdState, gop_frames: u32) -> f64 {
    if hrd.buffer_capacity < MIN_BUFFER_CAPACITY {
        0.0
    } else {
        f64::from(gop_frames).min(MAX_FRAME_SIZE_ALPHA)
    }
}

/// Pull the QPs of the other slice types towards `qpn` plus their fixed
/// offsets, by half (P/B and I/P pairs) or a quarter (I/B pairs) of the gap.
fn couple_slice_types(qp: &mut [i32; 3], slice_type: SliceType, qpn: i32) {
    let [qpi, qpp, qpb] = *qp;
    match slice_type {
        SliceType::P => {
            if (qpn + BRC_P_B_QP_DIFF - qpb).abs() > 2 {
                qp[2] += (qpn + BRC_P_B_QP_DIFF - qpb) >> 1;
            }
            if (qpn - BRC_I_P_QP_DIFF - qpi).abs() > 2 {
                qp[0] += (qpn - BRC_I_P_QP_DIFF - qpi) >> 1;
            }
        }
        SliceType::I => {
            if (qpn + BRC_I_B_QP_DIFF - qpb).abs() > 4 {
                qp[2] += (qpn + BRC_I_B_QP_DIFF - qpb) >> 2;
            }
            if (qpn + BRC_I_P_QP_DIFF - qpp).abs() > 2 {
                qp[1] += (qpn + BRC_I_P_QP_DIFF - qpp) >> 2;
            }
        }
        SliceType::B => {
            if (qpn - BRC_P_B_QP_DIFF - qpp).abs() > 2 {
                qp[1] += (qpn - BRC_P_B_QP_DIFF - qpp) >> 1;
            }
            if (qpn - BRC_I_B_QP_DIFF - qpi).abs() > 4 {
                qp[0] += (qpn - BRC_I_B_QP_DIFF - qpi) >> 2;
            }
        }
    }
}

/// Account `frame` against the HRD and predict the QP of the next picture of
/// `next_layer`.
///
/// A violation pins the prediction to the finished layer so the retry is
/// encoded with a corrected QP for the same picture.
pub fn postpack_cbr(
    layers: &mut LayerStates,
    frame: FinishedFrame,
    next_layer: usize,
    bounds: QpBounds,
) -> BrcStatus {
    let mut sts = match layers.hrd[frame.layer].update(frame.bits, RcMode::Cbr) {
        HrdUpdate::Ok => BrcStatus::NoViolation,
        HrdUpdate::Underflow => BrcStatus::Underflow,
        HrdUpdate::Overflow => BrcStatus::Overflow,
    };

    let next = if sts == BrcStatus::NoViolation {
        next_layer
    } else {
        frame.layer
    };

    layers
        .pending
        .record(frame.layer, frame.bits, frame.slice_type);

    // First frame of the next layer: nothing to predict from yet.
    let Some(prev) = layers.pending.previous(next) else {
        return sts;
    };
    let slice_type = prev.slice_type;
    let frame_bits = f64::from(prev.bits);

    let hrd = &layers.hrd[next];
    let brc = &mut layers.brc[next];

    let mut qps = [
        i32::from(brc.qp.i),
        i32::from(brc.qp.p),
        i32::from(brc.qp.b),
    ];
    let qp = i32::from(brc.qp[slice_type]);
    let max_qp = i32::from(bounds.max);
    let min_qp = i32::from(bounds.min);

    let target = brc.target_frame_size[slice_type];
    let alpha = frame_size_alpha(hrd, brc.gop_nums[slice_type]);
    let frame_size_next = predict_frame_size(target, frame_bits, alpha);

    let qpf = f64::from(qp) * target / frame_size_next;
    let mut qpn = round_with_accumulator(qpf, qp, &mut brc.qpf_rounding_accumulator);

    qpn = qpn.clamp(qp - BRC_QP_MAX_CHANGE, qp + BRC_QP_MAX_CHANGE);
    qpn = qpn.clamp(1, max_qp);

    let delta_qp = fullness_correction(hrd);
    qpn = (f64::from(qpn) + delta_qp + 0.5).floor() as i32;
    qpn = bounds.clamp(qpn);

    match sts {
        BrcStatus::NoViolation => {
            couple_slice_types(&mut qps, slice_type, qpn);
            for (slot, value) in SliceType::ALL.into_iter().zip(qps) {
                brc.qp[slot] = bounds.clamp(value) as u8;
            }
        }
        BrcStatus::Underflow => {
            if qpn <= qp {
                qpn = qp + 1;
            }
            if qpn > max_qp {
                qpn = max_qp;
                sts = BrcStatus::UnderflowAtMaxQp;
            }
        }
        BrcStatus::Overflow => {
            if qpn >= qp {
                qpn = qp - 1;
            }
            if qpn < min_qp {
                qpn = min_qp;
                sts = BrcStatus::OverflowAtMinQp;
            }
        }
        BrcStatus::UnderflowAtMaxQp | BrcStatus::OverflowAtMinQp => {}
    }

    brc.qp[slice_type] = qpn as u8;

    debug!(
        finished_layer = frame.layer,
        next_layer = next,
        slice = %slice_type,
        bits = prev.bits,
        target,
        qp_prev = qp,
        qp_next = qpn,
        delta_qp,
        fullness = hrd.current_buffer_fullness,
        status = ?sts,
        "cbr postpack"
    );

    sts
}
