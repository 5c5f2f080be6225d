//! Last finished frame of every temporal layer.
//!
//! With interleaved temporal layers the QP of the next frame of a layer is
//! predicted from that layer's own previous frame, which may have finished
//! several frames ago. A layer that has not produced a frame yet has no entry.

use super::types::SliceType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingFrame {
    pub bits: u32,
    pub slice_type: SliceType,
}

#[derive(Debug, Clone, Default)]
pub struct PendingFrames {
    slots: Vec<Option<PendingFrame>>,
}

impl PendingFrames {
    pub fn new(layers: usize) -> Self {
        Self {
            slots: vec![None; layers],
        }
    }

    /// Record the outcome of the frame that just finished on `layer`.
    pub fn record(&mut self, layer: usize, bits: u32, slice_type: SliceType) {
        if let Some(slot) = self.slots.get_mut(layer) {
            *slot = Some(PendingFrame { bits, slice_type });
        }
    }

    /// Previous finished frame of `layer`, if any.
    pub fn previous(&self, layer: usize) -> Option<PendingFrame> {
        self.slots.get(layer).copied().flatten()
    }
}
