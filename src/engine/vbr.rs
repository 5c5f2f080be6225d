//! Reactive variable bit-rate QP controller for a single temporal layer.
//!
//! The controller tries to keep the HRD buffer above its target level most of
//! the time so that a scene change or a burst of complexity can be absorbed by
//! the slack instead of by a QP spike on the following frames. It is optimistic
//! about future frames and holds the QP until the buffer bounds force a move.

use tracing::debug;

use super::hrd::HrdUpdate;
use super::state::LayerStates;
use super::types::{
    BRC_I_B_QP_DIFF, BRC_I_P_QP_DIFF, BRC_P_B_QP_DIFF, BrcStatus, FinishedFrame, PerSlice,
    QpBounds, RcMode, SliceType,
};

/// Extra QP steps for a frame much larger than its target: `2·ln(bits/target)`.
///
/// Zero for frames at or below target.
pub fn large_frame_adjustment(frame_bits: u32, target: f64) -> i32 {
    let bits = f64::from(frame_bits);
    if target <= 0.0 || bits <= target {
        return 0;
    }
    (2.0 * (bits / target).ln()).round_ties_even() as i32
}

/// Set `slice_type` to `qp` and derive the other two types from the fixed offsets.
fn pivot_qps(slice_type: SliceType, qp: i32) -> [i32; 3] {
    match slice_type {
        SliceType::I => [qp, qp + BRC_I_P_QP_DIFF, qp + BRC_I_B_QP_DIFF],
        SliceType::P => [qp - BRC_I_P_QP_DIFF, qp, qp + BRC_P_B_QP_DIFF],
        SliceType::B => [qp - BRC_I_B_QP_DIFF, qp - BRC_P_B_QP_DIFF, qp],
    }
}

/// Account `frame` against the HRD and adjust the QPs of its layer.
pub fn postpack_vbr(layers: &mut LayerStates, frame: FinishedFrame, bounds: QpBounds) -> BrcStatus {
    let layer = frame.layer;
    let update = layers.hrd[layer].update(frame.bits, RcMode::Vbr);

    let hrd = &layers.hrd[layer];
    let brc = &mut layers.brc[layer];
    let slice_type = frame.slice_type;
    let target = brc.target_frame_size[slice_type];
    let fullness = hrd.current_buffer_fullness;
    let bits = f64::from(frame.bits);
    let adjustment = large_frame_adjustment(frame.bits, target);

    let (mut sts, qp_delta) = match update {
        // Too big to send at all: re-encode harder.
        HrdUpdate::Underflow => (BrcStatus::Underflow, 2 + adjustment),
        // Not produced in VBR since the buffer clamps at the top.
        HrdUpdate::Overflow => (BrcStatus::Overflow, -1),
        HrdUpdate::Ok if bits <= target => {
            if fullness > (hrd.target_buffer_fullness + hrd.buffer_size) / 2.0 {
                (BrcStatus::NoViolation, -1)
            } else {
                (BrcStatus::NoViolation, 0)
            }
        }
        HrdUpdate::Ok => {
            if fullness > hrd.target_buffer_fullness {
                (BrcStatus::NoViolation, 0)
            } else if fullness > hrd.target_buffer_fullness / 2.0 {
                // Step up only if frames this far over target would drain the
                // buffer in less than a second's worth of frames.
                let frames_left = fullness / (bits - target + 1.0);
                if frames_left < brc.framerate {
                    (BrcStatus::NoViolation, 1)
                } else {
                    (BrcStatus::NoViolation, 0)
                }
            } else {
                (BrcStatus::NoViolation, 1 + adjustment)
            }
        }
    };

    let qp_prev = brc.qp[slice_type];
    let pivot = pivot_qps(slice_type, i32::from(qp_prev) + qp_delta);
    let mut qp = PerSlice::splat(0u8);
    for (slot, value) in SliceType::ALL.into_iter().zip(pivot) {
        qp[slot] = bounds.clamp(value) as u8;
    }
    brc.qp = qp;

    if sts == BrcStatus::Underflow && qp[slice_type] == bounds.max {
        sts = BrcStatus::UnderflowAtMaxQp;
    }
    if sts == BrcStatus::Overflow && qp[slice_type] == bounds.min {
        sts = BrcStatus::OverflowAtMinQp;
    }

    debug!(
        layer,
        slice = %slice_type,
        bits = frame.bits,
        target,
        qp_prev,
        qp_next = qp[slice_type],
        qp_delta,
        fullness,
        status = ?sts,
        "vbr postpack"
    );

    sts
}
