//! Picture timing values for the VUI HRD parameters and SEI messages.
//!
//! Only CBR streams signal HRD timing. The frame counter advances once per
//! accepted picture and scales the CPB removal delay of the picture timing SEI.

use serde::{Deserialize, Serialize};

/// Clock ticks per second of the CPB removal delay fields.
pub const HRD_CLOCK_HZ: f64 = 90_000.0;

/// Bit length of each delay field in the SEI syntax.
pub const HRD_DELAY_LENGTH: u8 = 24;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HrdTiming {
    /// Top-layer bitrate in units of 1024 bit/s.
    pub bit_rate_value: u64,
    /// CPB size in units of 1024 bits.
    pub cpb_size_value: u64,
    /// Initial removal delay of the first picture, in 90 kHz ticks.
    pub initial_cpb_removal_delay: u32,
    /// Removal delay increment per picture.
    pub cpb_removal_delay: u32,
    /// Pictures accepted since (re)initialisation.
    pub frame_number: u64,
    pub initial_cpb_removal_delay_length: u8,
    pub cpb_removal_delay_length: u8,
    pub dpb_output_delay_length: u8,
}

impl HrdTiming {
    pub fn new(bitrate: u64, buffer_size: f64, initial_fullness: f64) -> Self {
        let initial_delay = if bitrate > 0 {
            (initial_fullness / bitrate as f64 * HRD_CLOCK_HZ) as u32
        } else {
            0
        };

        Self {
            bit_rate_value: bitrate >> 10,
            cpb_size_value: (buffer_size as u64) >> 10,
            initial_cpb_removal_delay: initial_delay,
            cpb_removal_delay: 2,
            frame_number: 0,
            initial_cpb_removal_delay_length: HRD_DELAY_LENGTH,
            cpb_removal_delay_length: HRD_DELAY_LENGTH,
            dpb_output_delay_length: HRD_DELAY_LENGTH,
        }
    }

    /// Advance to the next picture.
    pub fn advance(&mut self) {
        self.frame_number += 1;
    }

    /// Removal delay of the current picture, wrapped to the field length.
    pub fn current_cpb_removal_delay(&self) -> u64 {
        let mask = 1u64
            .checked_shl(u32::from(self.cpb_removal_delay_length))
            .map_or(u64::MAX, |bit| bit - 1);
        u64::from(self.cpb_removal_delay).wrapping_mul(self.frame_number) & mask
    }
}
