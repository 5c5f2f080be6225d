//! Entry points used by the surrounding encoder: prepare the state for a
//! sequence, report finished pictures, read the QP for the next attempt.

use thiserror::Error;
use tracing::{info, warn};

use super::cbr::postpack_cbr;
use super::hrd::HrdState;
use super::init::{BrcState, init_layers, total_buffer_size, total_initial_fullness};
use super::state::LayerStates;
use super::timing::HrdTiming;
use super::types::{BrcStatus, FinishedFrame, QpBounds, RcMode, SliceType};
use super::vbr::postpack_vbr;
use crate::config::{ConfigError, RateControlConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("rate control has not been prepared")]
    NotPrepared,

    #[error("temporal layer {0} is not configured")]
    UnknownLayer(usize),
}

/// Bit-rate controller of one encode session.
#[derive(Debug, Default)]
pub struct BrcEngine {
    config: Option<RateControlConfig>,
    layers: LayerStates,
    timing: Option<HrdTiming>,
    frames_accepted: u64,
}

impl BrcEngine {
    /// Create an engine with no state. Call [`BrcEngine::prepare`] before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine already prepared for `config`.
    pub fn with_config(config: &RateControlConfig) -> Result<Self, ConfigError> {
        let mut engine = Self::new();
        engine.prepare(config, true)?;
        Ok(engine)
    }

    /// (Re)initialise the per-layer state when `need_reset` is set or nothing
    /// has been initialised yet. On error the previous state is kept.
    pub fn prepare(&mut self, config: &RateControlConfig, need_reset: bool) -> Result<(), ConfigError> {
        if !need_reset && self.is_prepared() {
            return Ok(());
        }

        let (hrd, brc) = init_layers(config)?;
        self.layers = LayerStates::new(hrd, brc);

        self.timing = match config.mode {
            RcMode::Cbr => {
                let buffer = total_buffer_size(config);
                let fullness = total_initial_fullness(config, buffer);
                Some(HrdTiming::new(config.top_bitrate(), buffer, fullness))
            }
            RcMode::Vbr => None,
        };
        self.frames_accepted = 0;
        self.config = Some(config.clone());

        info!(
            mode = %config.mode,
            codec = ?config.codec,
            layers = config.num_layers(),
            "rate control prepared"
        );

        Ok(())
    }

    pub fn is_prepared(&self) -> bool {
        self.config.is_some()
    }

    pub fn config(&self) -> Option<&RateControlConfig> {
        self.config.as_ref()
    }

    fn prepared_config(&self) -> Result<&RateControlConfig, EngineError> {
        self.config.as_ref().ok_or(EngineError::NotPrepared)
    }

    /// Temporal layer of the frame with sequence number `frame`.
    pub fn layer_for_frame(&self, frame: u64) -> usize {
        match &self.config {
            Some(config) if !config.layer_pattern.is_empty() => {
                let pattern = &config.layer_pattern;
                pattern[(frame % pattern.len() as u64) as usize]
            }
            _ => 0,
        }
    }

    /// Layer of the picture currently being encoded.
    pub fn current_layer(&self) -> usize {
        self.layer_for_frame(self.frames_accepted)
    }

    /// Layer of the picture after the current one.
    pub fn next_layer(&self) -> usize {
        self.layer_for_frame(self.frames_accepted + 1)
    }

    /// Report the size of the picture just encoded on `finished_layer` and
    /// predict the QP of the next attempt or picture.
    pub fn postpack(
        &mut self,
        finished_layer: usize,
        slice_type: SliceType,
        frame_bits: u32,
    ) -> Result<BrcStatus, EngineError> {
        let config = self.prepared_config()?;
        if finished_layer >= self.layers.len() {
            return Err(EngineError::UnknownLayer(finished_layer));
        }

        let mode = config.mode;
        let bounds = QpBounds {
            min: config.effective_min_qp(),
            max: config.max_qp(),
        };
        let frame = FinishedFrame {
            layer: finished_layer,
            slice_type,
            bits: frame_bits,
        };

        let status = match mode {
            RcMode::Cbr => {
                let next = self.next_layer();
                postpack_cbr(&mut self.layers, frame, next, bounds)
            }
            RcMode::Vbr => postpack_vbr(&mut self.layers, frame, bounds),
        };

        Ok(status)
    }

    /// Advance the frame counter used for layer scheduling and HRD timing.
    /// Call exactly once per accepted picture.
    pub fn hrd_context_update(&mut self) {
        self.frames_accepted += 1;
        if let Some(timing) = self.timing.as_mut() {
            timing.advance();
        }
    }

    /// QP to program for the next picture of `slice_type` on `layer`.
    pub fn current_qp(&self, layer: usize, slice_type: SliceType) -> Option<u8> {
        self.layers.brc.get(layer).map(|brc| brc.qp[slice_type])
    }

    /// Report an unrepairable violation on `layer`. Logs only the first of a
    /// run of consecutive violations; returns whether this call logged.
    pub fn note_unrepairable(&mut self, layer: usize, status: BrcStatus) -> bool {
        if !status.is_unrepairable() {
            return false;
        }
        let Some(hrd) = self.layers.hrd.get_mut(layer) else {
            return false;
        };
        if hrd.violation_noted {
            return false;
        }
        hrd.violation_noted = true;

        let kind = match status {
            BrcStatus::OverflowAtMinQp => "overflow",
            _ => "underflow",
        };
        warn!(
            layer,
            fullness = hrd.current_buffer_fullness,
            buffer_size = hrd.buffer_size,
            "unrepairable HRD {kind}, accepting frame"
        );
        true
    }

    /// A picture on `layer` was accepted without violation.
    pub fn clear_violation(&mut self, layer: usize) {
        if let Some(hrd) = self.layers.hrd.get_mut(layer) {
            hrd.violation_noted = false;
        }
    }

    pub fn frames_accepted(&self) -> u64 {
        self.frames_accepted
    }

    pub fn timing(&self) -> Option<&HrdTiming> {
        self.timing.as_ref()
    }

    pub fn hrd(&self, layer: usize) -> Option<&HrdState> {
        self.layers.hrd.get(layer)
    }

    pub fn brc(&self, layer: usize) -> Option<&BrcState> {
        self.layers.brc.get(layer)
    }

    pub fn layers(&self) -> &LayerStates {
        &self.layers
    }

    /// Direct access to the layer state, for callers that restore or seed it.
    pub fn layers_mut(&mut self) -> &mut LayerStates {
        &mut self.layers
    }
}
