//! Shared rate-control vocabulary: slice types, per-slice storage, status codes
//! and the empirical tuning constants used by the initializer and predictors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Largest QP step allowed between two consecutive predictions of one slice type.
pub const BRC_QP_MAX_CHANGE: i32 = 5;

/// Target-size weight of a P frame relative to an I frame.
pub const BRC_PWEIGHT: f64 = 0.6;

/// Target-size weight of a B frame relative to an I frame.
pub const BRC_BWEIGHT: f64 = 0.25;

/// Expected QP offsets between slice types of the same layer.
pub const BRC_I_P_QP_DIFF: i32 = 2;
pub const BRC_P_B_QP_DIFF: i32 = 4;
pub const BRC_I_B_QP_DIFF: i32 = BRC_I_P_QP_DIFF + BRC_P_B_QP_DIFF;

/// Initial QP ceilings applied after the bits-per-frame interpolation.
pub const BRC_INIT_MAX_QP_I: i32 = 36;
pub const BRC_INIT_MAX_QP_P: i32 = 40;
pub const BRC_INIT_MAX_QP_B: i32 = 45;

/// HRD buffer sizing, in seconds of data at the layer bitrate.
pub const HRD_DEFAULT_SECONDS: f64 = 8.0;
pub const HRD_MIN_SECONDS: f64 = 1.0;
pub const HRD_MAX_SECONDS: f64 = 32.0;

/// Below this many QP=1 frames of buffering the GOP smoothing term is disabled.
pub const MIN_BUFFER_CAPACITY: f64 = 5.0;

/// Upper bound for the GOP smoothing factor.
pub const MAX_FRAME_SIZE_ALPHA: f64 = 30.0;

/// Maximum number of temporal layers supported by the engine.
pub const MAX_TEMPORAL_LAYERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SliceType {
    I,
    P,
    B,
}

impl SliceType {
    pub const ALL: [SliceType; 3] = [SliceType::I, SliceType::P, SliceType::B];

    /// Map an H.264 `slice_type` syntax element (0..=9) onto I/P/B.
    ///
    /// SP slices are treated as P and SI slices as I, values 5..=9 fold onto 0..=4.
    pub fn from_avc(raw: u8) -> Option<Self> {
        match raw % 5 {
            0 | 3 => Some(SliceType::P),
            1 => Some(SliceType::B),
            2 | 4 => Some(SliceType::I),
            _ => None,
        }
        .filter(|_| raw <= 9)
    }

    /// Map an HEVC `slice_type` syntax element (0=B, 1=P, 2=I).
    pub fn from_hevc(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(SliceType::B),
            1 => Some(SliceType::P),
            2 => Some(SliceType::I),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SliceType::I => "I",
            SliceType::P => "P",
            SliceType::B => "B",
        }
    }
}

impl fmt::Display for SliceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per slice type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerSlice<T> {
    pub i: T,
    pub p: T,
    pub b: T,
}

impl<T: Copy> PerSlice<T> {
    pub fn splat(value: T) -> Self {
        Self {
            i: value,
            p: value,
            b: value,
        }
    }
}

impl<T> Index<SliceType> for PerSlice<T> {
    type Output = T;

    fn index(&self, slice: SliceType) -> &T {
        match slice {
            SliceType::I => &self.i,
            SliceType::P => &self.p,
            SliceType::B => &self.b,
        }
    }
}

impl<T> IndexMut<SliceType> for PerSlice<T> {
    fn index_mut(&mut self, slice: SliceType) -> &mut T {
        match slice {
            SliceType::I => &mut self.i,
            SliceType::P => &mut self.p,
            SliceType::B => &mut self.b,
        }
    }
}

/// Inclusive QP range the predictors clamp into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QpBounds {
    pub min: u8,
    pub max: u8,
}

impl QpBounds {
    pub fn clamp(&self, qp: i32) -> i32 {
        qp.clamp(i32::from(self.min), i32::from(self.max))
    }
}

/// A picture whose encoded size is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishedFrame {
    pub layer: usize,
    pub slice_type: SliceType,
    pub bits: u32,
}

/// Outcome of a postpack call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrcStatus {
    NoViolation,
    /// Frame too large for the buffer; re-encode at a higher QP.
    Underflow,
    /// Frame too small, buffer would overfill; re-encode at a lower QP.
    Overflow,
    /// Underflow while already at the QP ceiling. Not repairable.
    UnderflowAtMaxQp,
    /// Overflow while already at the QP floor. Not repairable.
    OverflowAtMinQp,
}

impl BrcStatus {
    /// Violation that another encode attempt at the newly predicted QP can fix.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BrcStatus::Underflow | BrcStatus::Overflow)
    }

    pub fn is_unrepairable(&self) -> bool {
        matches!(
            self,
            BrcStatus::UnderflowAtMaxQp | BrcStatus::OverflowAtMinQp
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RcMode {
    #[default]
    Cbr,
    Vbr,
}

impl fmt::Display for RcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RcMode::Cbr => f.write_str("CBR"),
            RcMode::Vbr => f.write_str("VBR"),
        }
    }
}

/// Codec-specific QP range and bits-per-pixel reference points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Avc,
    Hevc,
}

impl Codec {
    pub fn max_qp(&self) -> u8 {
        match self {
            Codec::Avc | Codec::Hevc => 51,
        }
    }

    /// Share of a raw frame expected at QP=1.
    pub fn qp1_ratio(&self, layered: bool) -> f64 {
        match (self, layered) {
            (Codec::Avc | Codec::Hevc, false) => 0.1,
            (Codec::Avc | Codec::Hevc, true) => 0.15,
        }
    }

    /// Share of a raw frame expected at the QP ceiling.
    pub fn qp51_ratio(&self) -> f64 {
        match self {
            Codec::Avc | Codec::Hevc => 0.001,
        }
    }
}
