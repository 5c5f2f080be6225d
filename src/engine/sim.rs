//! Synthetic encode pipeline for exercising the controller without hardware.
//!
//! Frame sizes follow the usual exponential QP model: the size halves every six
//! QP steps from the QP=1 reference size, scaled per slice type and by a
//! content complexity factor. Optional multiplicative noise and periodic scene
//! changes make the sequence less regular.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::driver::{EncodePipeline, PictureRequest};
use super::init::QpSizeModel;
use super::types::{PerSlice, SliceType};
use crate::config::RateControlConfig;

/// Relative size of each slice type at equal QP.
const SLICE_SCALE: PerSlice<f64> = PerSlice {
    i: 1.0,
    p: 0.45,
    b: 0.25,
};

#[derive(Debug, Clone)]
pub struct SyntheticPipeline {
    qp1_size: f64,
    complexity: f64,
    noise: f64,
    scene_change_every: Option<u64>,
    scene_change_boost: f64,
    rng: StdRng,
    encodes: u64,
}

impl SyntheticPipeline {
    pub fn new(config: &RateControlConfig, seed: u64) -> Self {
        Self {
            qp1_size: QpSizeModel::for_config(config).qp1_size,
            complexity: 1.0,
            noise: 0.1,
            scene_change_every: None,
            scene_change_boost: 4.0,
            rng: StdRng::seed_from_u64(seed),
            encodes: 0,
        }
    }

    pub fn with_complexity(mut self, complexity: f64) -> Self {
        self.complexity = complexity.max(0.0);
        self
    }

    /// Relative amplitude of the per-encode size noise, 0 for none.
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise.clamp(0.0, 0.9);
        self
    }

    /// Make every `every`-th picture (after the first) `boost` times larger.
    pub fn with_scene_changes(mut self, every: u64, boost: f64) -> Self {
        self.scene_change_every = (every > 0).then_some(every);
        self.scene_change_boost = boost.max(1.0);
        self
    }

    /// Total encode calls, retries included.
    pub fn encodes(&self) -> u64 {
        self.encodes
    }

    pub fn is_scene_change(&self, frame_number: u64) -> bool {
        match self.scene_change_every {
            Some(every) => frame_number > 0 && frame_number % every == 0,
            None => false,
        }
    }

    /// Noise-free size of `slice_type` at `qp`.
    pub fn model_bits(&self, slice_type: SliceType, qp: u8) -> f64 {
        let steps = f64::from(qp.max(1) - 1) / 6.0;
        self.complexity * SLICE_SCALE[slice_type] * self.qp1_size * (-steps).exp2()
    }
}

impl EncodePipeline for SyntheticPipeline {
    fn encode(&mut self, picture: &PictureRequest, qp: u8) -> anyhow::Result<u32> {
        self.encodes += 1;

        let mut bits = self.model_bits(picture.slice_type, qp);
        if self.is_scene_change(picture.frame_number) {
            bits *= self.scene_change_boost;
        }
        if self.noise > 0.0 {
            bits *= 1.0 + self.rng.gen_range(-self.noise..=self.noise);
        }

        Ok(bits.round().clamp(0.0, f64::from(u32::MAX)) as u32)
    }
}
