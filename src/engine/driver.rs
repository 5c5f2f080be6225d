//! Encode-retry loop around the rate controller.
//!
//! Each picture is encoded at the QP the controller currently holds for its
//! layer and slice type, measured, and handed to postpack. Recoverable HRD
//! violations re-encode the same picture at the corrected QP; unrepairable
//! ones and exhausted retries accept the last attempt.

use anyhow::Context;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::brc::{BrcEngine, EngineError};
use super::types::{BrcStatus, SliceType};
use crate::config::{ConfigError, RateControlConfig};

/// A picture handed to the encode pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureRequest {
    /// Sequence number of the picture since the last reset.
    pub frame_number: u64,
    pub layer: usize,
    pub slice_type: SliceType,
}

/// Hardware (or simulated) encoder: program the picture at `qp`, run it and
/// report the encoded size in bits.
pub trait EncodePipeline {
    fn encode(&mut self, picture: &PictureRequest, qp: u8) -> anyhow::Result<u32>;
}

impl<F> EncodePipeline for F
where
    F: FnMut(&PictureRequest, u8) -> anyhow::Result<u32>,
{
    fn encode(&mut self, picture: &PictureRequest, qp: u8) -> anyhow::Result<u32> {
        self(picture, qp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    Idle,
    Encoding,
    Measuring,
    Accepted,
    RetryWithNewQp,
    /// Kept despite a violation at the QP limit.
    Latched,
    /// Kept despite a violation after the last allowed attempt.
    RetryLimit,
}

/// How a picture left the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// HRD compliant.
    Accepted,
    /// Violation at the QP limit; output kept as is.
    Latched,
    /// Still violating after the last allowed attempt; output kept as is.
    RetryLimit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameOutcome {
    pub frame_number: u64,
    pub layer: usize,
    pub slice_type: SliceType,
    /// QP of every attempt, in order.
    pub qps: Vec<u8>,
    /// Size of the kept attempt.
    pub bits: u32,
    /// Postpack status of the kept attempt.
    pub status: BrcStatus,
    pub disposition: Disposition,
    /// Driver states visited while encoding this picture.
    pub states: Vec<DriverState>,
}

impl FrameOutcome {
    pub fn attempts(&self) -> u32 {
        self.qps.len() as u32
    }

    /// QP of the kept attempt.
    pub fn qp(&self) -> u8 {
        self.qps.last().copied().unwrap_or(0)
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Pipeline(#[from] anyhow::Error),
}

pub struct EncodeDriver<P> {
    engine: BrcEngine,
    pipeline: P,
    state: DriverState,
}

impl<P: EncodePipeline> EncodeDriver<P> {
    pub fn new(engine: BrcEngine, pipeline: P) -> Self {
        Self {
            engine,
            pipeline,
            state: DriverState::Idle,
        }
    }

    /// Prepared engine for `config` driving `pipeline`.
    pub fn with_config(config: &RateControlConfig, pipeline: P) -> Result<Self, ConfigError> {
        Ok(Self::new(BrcEngine::with_config(config)?, pipeline))
    }

    pub fn prepare(&mut self, config: &RateControlConfig, need_reset: bool) -> Result<(), ConfigError> {
        self.engine.prepare(config, need_reset)
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn engine(&self) -> &BrcEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut BrcEngine {
        &mut self.engine
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut P {
        &mut self.pipeline
    }

    pub fn into_parts(self) -> (BrcEngine, P) {
        (self.engine, self.pipeline)
    }

    fn enter(&mut self, state: DriverState, visited: &mut Vec<DriverState>) {
        trace!(from = ?self.state, to = ?state, "driver transition");
        self.state = state;
        visited.push(state);
    }

    /// Encode the next picture of the sequence until it is accepted.
    ///
    /// On a pipeline error the picture is abandoned: the HRD model is left as
    /// it was before the failing attempt and the frame counter does not move.
    pub fn encode_frame(&mut self, slice_type: SliceType) -> Result<FrameOutcome, DriverError> {
        let max_attempts = self
            .engine
            .config()
            .map(|c| c.max_attempts)
            .ok_or(EngineError::NotPrepared)?;

        let picture = PictureRequest {
            frame_number: self.engine.frames_accepted(),
            layer: self.engine.current_layer(),
            slice_type,
        };
        let layer = picture.layer;

        let mut states = Vec::new();
        let mut qps = Vec::new();
        self.enter(DriverState::Idle, &mut states);

        loop {
            let qp = self
                .engine
                .current_qp(layer, slice_type)
                .ok_or(EngineError::UnknownLayer(layer))?;
            qps.push(qp);

            self.enter(DriverState::Encoding, &mut states);
            let encoded = self.pipeline.encode(&picture, qp).with_context(|| {
                format!(
                    "Failed to encode frame {} (attempt {})",
                    picture.frame_number,
                    qps.len()
                )
            });
            let bits = match encoded {
                Ok(bits) => bits,
                Err(e) => {
                    self.enter(DriverState::Idle, &mut states);
                    return Err(e.into());
                }
            };

            self.enter(DriverState::Measuring, &mut states);
            let status = self.engine.postpack(layer, slice_type, bits)?;

            let disposition = match status {
                BrcStatus::NoViolation => {
                    self.engine.clear_violation(layer);
                    self.enter(DriverState::Accepted, &mut states);
                    Some(Disposition::Accepted)
                }
                BrcStatus::UnderflowAtMaxQp | BrcStatus::OverflowAtMinQp => {
                    self.engine.note_unrepairable(layer, status);
                    self.enter(DriverState::Latched, &mut states);
                    Some(Disposition::Latched)
                }
                BrcStatus::Underflow | BrcStatus::Overflow
                    if qps.len() as u32 >= max_attempts =>
                {
                    warn!(
                        frame = picture.frame_number,
                        layer,
                        attempts = qps.len(),
                        status = ?status,
                        "retry limit reached, accepting frame"
                    );
                    self.enter(DriverState::RetryLimit, &mut states);
                    Some(Disposition::RetryLimit)
                }
                BrcStatus::Underflow | BrcStatus::Overflow => {
                    self.enter(DriverState::RetryWithNewQp, &mut states);
                    None
                }
            };

            if let Some(disposition) = disposition {
                self.engine.hrd_context_update();
                debug!(
                    frame = picture.frame_number,
                    layer,
                    slice = %slice_type,
                    bits,
                    attempts = qps.len(),
                    disposition = ?disposition,
                    "frame done"
                );
                return Ok(FrameOutcome {
                    frame_number: picture.frame_number,
                    layer,
                    slice_type,
                    qps,
                    bits,
                    status,
                    disposition,
                    states,
                });
            }
        }
    }
}
