use super::hrd::HrdState;
use super::init::BrcState;
use super::lag::PendingFrames;

/// Mutable rate-control state of every temporal layer, indexed by layer id.
#[derive(Debug, Clone, Default)]
pub struct LayerStates {
    pub hrd: Vec<HrdState>,
    pub brc: Vec<BrcState>,
    pub pending: PendingFrames,
}

impl LayerStates {
    pub fn new(hrd: Vec<HrdState>, brc: Vec<BrcState>) -> Self {
        let pending = PendingFrames::new(brc.len());
        Self { hrd, brc, pending }
    }

    pub fn len(&self) -> usize {
        self.brc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brc.is_empty()
    }
}
