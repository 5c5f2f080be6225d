// Bit-rate control engine - independent of the CLI

pub mod brc;
pub mod cbr;
pub mod driver;
pub mod hrd;
pub mod init;
pub mod lag;
pub mod log;
pub mod sim;
pub mod state;
pub mod timing;
pub mod types;
pub mod vbr;

pub use brc::{BrcEngine, EngineError};
pub use driver::{
    Disposition, DriverError, DriverState, EncodeDriver, EncodePipeline, FrameOutcome,
    PictureRequest,
};
pub use hrd::{HrdState, HrdUpdate};
pub use init::{BrcState, QpSizeModel, init_layers};
pub use sim::SyntheticPipeline;
pub use state::LayerStates;
pub use timing::HrdTiming;
pub use types::*;
