//! Leaky-bucket model of the hypothetical reference decoder buffer.
//!
//! The buffer drains by the size of every produced frame and refills by the
//! nominal bits-per-frame of its layer. CBR treats both borders as violations,
//! VBR only cares about running dry and silently clamps at the top.

use serde::{Deserialize, Serialize};

use super::types::RcMode;

/// Buffer state of one temporal layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrdState {
    /// Capacity in bits. Zero disables both border checks.
    pub buffer_size: f64,
    pub current_buffer_fullness: f64,
    pub target_buffer_fullness: f64,
    /// Buffer size expressed in QP=1 frames.
    pub buffer_capacity: f64,
    /// Nominal refill per frame.
    pub bits_per_frame: f64,
    /// Set once an unrepairable violation has been reported for this layer.
    pub violation_noted: bool,
}

/// Result of charging one frame to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HrdUpdate {
    Ok,
    Underflow,
    Overflow,
}

impl HrdState {
    /// Charge `frame_bits` to the buffer and refill it by one frame period.
    ///
    /// On a violation the fullness is restored to its value before the call.
    pub fn update(&mut self, frame_bits: u32, mode: RcMode) -> HrdUpdate {
        let prev = self.current_buffer_fullness;
        let bounded = self.buffer_size > 0.0;

        self.current_buffer_fullness -= f64::from(frame_bits);
        if bounded && self.current_buffer_fullness <= 0.0 {
            self.current_buffer_fullness = prev;
            return HrdUpdate::Underflow;
        }

        self.current_buffer_fullness += self.bits_per_frame;
        if bounded && self.current_buffer_fullness > self.buffer_size {
            match mode {
                RcMode::Vbr => self.current_buffer_fullness = self.buffer_size,
                RcMode::Cbr => {
                    self.current_buffer_fullness = prev;
                    return HrdUpdate::Overflow;
                }
            }
        }

        HrdUpdate::Ok
    }

    /// Fullness as a percentage of the buffer size (0 when unbounded).
    pub fn fullness_pct(&self) -> f64 {
        if self.buffer_size > 0.0 {
            self.current_buffer_fullness / self.buffer_size * 100.0
        } else {
            0.0
        }
    }
}
