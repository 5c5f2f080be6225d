// Rate-control session configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::engine::types::{Codec, MAX_TEMPORAL_LAYERS, RcMode, SliceType};

/// Configuration problems detected before any state is (re)initialized
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("at least one temporal layer is required")]
    NoLayers,

    #[error("{0} temporal layers requested, at most 4 are supported")]
    TooManyLayers(usize),

    #[error("layer {layer} has a zero framerate")]
    ZeroFramerate { layer: usize },

    #[error("layer {layer} has a zero bitrate")]
    ZeroBitrate { layer: usize },

    #[error("layer {layer} bitrate {bitrate} does not exceed the layer below ({below})")]
    NonIncreasingBitrate {
        layer: usize,
        bitrate: u64,
        below: u64,
    },

    #[error("layer {layer} framerate does not exceed the layer below")]
    NonIncreasingFramerate { layer: usize },

    #[error("layer {layer} target percentage {pct} is outside 0..=100")]
    TargetPercentage { layer: usize, pct: u32 },

    #[error("GOP size must be nonzero")]
    EmptyGop,

    #[error("GOP frame counts I={i} P={p} B={b} do not add up to GOP size {size}")]
    GopMismatch { size: u32, i: u32, p: u32, b: u32 },

    #[error("GOP must contain at least one I frame")]
    NoIntraFrame,

    #[error("frame size {width}x{height} is empty")]
    EmptyFrame { width: u32, height: u32 },

    #[error("bit depth {0} is not supported (expected 8 or 10)")]
    BitDepth(u8),

    #[error("min_qp {min_qp} exceeds the codec maximum {max_qp}")]
    MinQp { min_qp: u8, max_qp: u8 },

    #[error("initial_qp {qp} is outside {min_qp}..={max_qp}")]
    InitialQp { qp: u8, min_qp: u8, max_qp: u8 },

    #[error("layer pattern is empty")]
    EmptyLayerPattern,

    #[error("layer pattern references layer {0}, which is not configured")]
    UnknownPatternLayer(usize),

    #[error("VBR supports a single temporal layer only ({0} configured)")]
    MultiLayerVbr(usize),

    #[error("unsupported rate control mode '{0}' (expected cbr or vbr)")]
    UnsupportedMode(String),

    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
}

impl FromStr for RcMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cbr" => Ok(RcMode::Cbr),
            "vbr" => Ok(RcMode::Vbr),
            _ => Err(ConfigError::UnsupportedMode(s.to_string())),
        }
    }
}

/// One temporal layer. Bitrate and framerate are cumulative: layer N includes
/// every layer below it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Bits per second
    pub bitrate: u64,

    pub framerate_num: u32,

    #[serde(default = "default_framerate_den")]
    pub framerate_den: u32,

    /// VBR only: share of the bitrate delta actually targeted (0 = 100%)
    #[serde(default)]
    pub target_percentage: u32,
}

impl LayerConfig {
    pub fn new(bitrate: u64, framerate_num: u32, framerate_den: u32) -> Self {
        Self {
            bitrate,
            framerate_num,
            framerate_den,
            target_percentage: 0,
        }
    }

    pub fn framerate(&self) -> f64 {
        if self.framerate_den == 0 {
            return 0.0;
        }
        f64::from(self.framerate_num) / f64::from(self.framerate_den)
    }
}

/// Frame type counts of one GOP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GopStructure {
    pub size: u32,
    pub i_frames: u32,
    pub p_frames: u32,
    #[serde(default)]
    pub b_frames: u32,
}

impl GopStructure {
    pub fn new(size: u32, i_frames: u32, p_frames: u32, b_frames: u32) -> Self {
        Self {
            size,
            i_frames,
            p_frames,
            b_frames,
        }
    }

    /// Slice type of the frame at `index` in display order.
    ///
    /// Intra frames sit at evenly spaced positions starting with 0; B frames are
    /// spread between P anchors.
    pub fn slice_type_at(&self, index: u64) -> SliceType {
        if self.size == 0 {
            return SliceType::P;
        }
        let pos = (index % u64::from(self.size)) as u32;
        let intra_spacing = (self.size / self.i_frames.max(1)).max(1);
        if self.i_frames > 0 && pos % intra_spacing == 0 {
            return SliceType::I;
        }
        if self.b_frames == 0 {
            return SliceType::P;
        }
        let ip_period = ((self.b_frames + self.p_frames) / self.p_frames.max(1)).max(1);
        if pos % ip_period == 0 {
            SliceType::P
        } else {
            SliceType::B
        }
    }
}

impl Default for GopStructure {
    fn default() -> Self {
        Self::new(30, 1, 29, 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateControlConfig {
    #[serde(default)]
    pub mode: RcMode,

    #[serde(default)]
    pub codec: Codec,

    pub width: u32,

    pub height: u32,

    #[serde(default = "default_bit_depth")]
    pub bit_depth: u8,

    /// Lowest QP the controller may select (0 is treated as 1)
    #[serde(default = "default_min_qp")]
    pub min_qp: u8,

    /// Skip the bits-per-pixel heuristic and start every slice type at this QP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_qp: Option<u8>,

    /// HRD buffer size in bits (0 = derive from bitrate)
    #[serde(default)]
    pub hrd_buffer_size: u64,

    /// Initial HRD buffer fullness in bits (0 = half the buffer)
    #[serde(default)]
    pub hrd_initial_fullness: u64,

    /// Encode attempts per frame before the last result is accepted as is
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Temporal layer of each frame in the repeating schedule
    #[serde(default = "default_layer_pattern")]
    pub layer_pattern: Vec<usize>,

    #[serde(default)]
    pub gop: GopStructure,

    pub layers: Vec<LayerConfig>,
}

fn default_framerate_den() -> u32 {
    1
}

fn default_bit_depth() -> u8 {
    8
}

fn default_min_qp() -> u8 {
    1
}

fn default_max_attempts() -> u32 {
    4
}

fn default_layer_pattern() -> Vec<usize> {
    vec![0]
}

impl Default for RateControlConfig {
    fn default() -> Self {
        Self {
            mode: RcMode::Cbr,
            codec: Codec::Avc,
            width: 1920,
            height: 1080,
            bit_depth: default_bit_depth(),
            min_qp: default_min_qp(),
            initial_qp: None,
            hrd_buffer_size: 0,
            hrd_initial_fullness: 0,
            max_attempts: default_max_attempts(),
            layer_pattern: default_layer_pattern(),
            gop: GopStructure::default(),
            layers: vec![LayerConfig::new(2_000_000, 30, 1)],
        }
    }
}

impl RateControlConfig {
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Cumulative bitrate of the highest layer
    pub fn top_bitrate(&self) -> u64 {
        self.layers.last().map(|l| l.bitrate).unwrap_or(0)
    }

    pub fn max_qp(&self) -> u8 {
        self.codec.max_qp()
    }

    pub fn effective_min_qp(&self) -> u8 {
        self.min_qp.max(1)
    }

    /// Check the configuration for values the controller cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.layers.is_empty() {
            return Err(ConfigError::NoLayers);
        }
        if self.layers.len() > MAX_TEMPORAL_LAYERS {
            return Err(ConfigError::TooManyLayers(self.layers.len()));
        }
        if self.mode == RcMode::Vbr && self.layers.len() > 1 {
            return Err(ConfigError::MultiLayerVbr(self.layers.len()));
        }

        for (idx, layer) in self.layers.iter().enumerate() {
            if layer.framerate_num == 0 || layer.framerate_den == 0 {
                return Err(ConfigError::ZeroFramerate { layer: idx });
            }
            if layer.bitrate == 0 {
                return Err(ConfigError::ZeroBitrate { layer: idx });
            }
            if layer.target_percentage > 100 {
                return Err(ConfigError::TargetPercentage {
                    layer: idx,
                    pct: layer.target_percentage,
                });
            }
            if idx > 0 {
                let below = &self.layers[idx - 1];
                if layer.bitrate <= below.bitrate {
                    return Err(ConfigError::NonIncreasingBitrate {
                        layer: idx,
                        bitrate: layer.bitrate,
                        below: below.bitrate,
                    });
                }
                if layer.framerate() <= below.framerate() {
                    return Err(ConfigError::NonIncreasingFramerate { layer: idx });
                }
            }
        }

        let gop = &self.gop;
        if gop.size == 0 {
            return Err(ConfigError::EmptyGop);
        }
        let counted = gop
            .i_frames
            .checked_add(gop.p_frames)
            .and_then(|n| n.checked_add(gop.b_frames));
        if counted != Some(gop.size) {
            return Err(ConfigError::GopMismatch {
                size: gop.size,
                i: gop.i_frames,
                p: gop.p_frames,
                b: gop.b_frames,
            });
        }
        if gop.i_frames == 0 {
            return Err(ConfigError::NoIntraFrame);
        }

        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::EmptyFrame {
                width: self.width,
                height: self.height,
            });
        }
        if self.bit_depth != 8 && self.bit_depth != 10 {
            return Err(ConfigError::BitDepth(self.bit_depth));
        }

        let max_qp = self.max_qp();
        if self.min_qp > max_qp {
            return Err(ConfigError::MinQp {
                min_qp: self.min_qp,
                max_qp,
            });
        }
        if let Some(qp) = self.initial_qp {
            if qp < self.effective_min_qp() || qp > max_qp {
                return Err(ConfigError::InitialQp {
                    qp,
                    min_qp: self.effective_min_qp(),
                    max_qp,
                });
            }
        }

        if self.layer_pattern.is_empty() {
            return Err(ConfigError::EmptyLayerPattern);
        }
        if let Some(&bad) = self
            .layer_pattern
            .iter()
            .find(|&&layer| layer >= self.layers.len())
        {
            return Err(ConfigError::UnknownPatternLayer(bad));
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }

        Ok(())
    }

    /// Default location of the config file
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("vabrc");

        Ok(config_dir.join("rc.toml"))
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: RateControlConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid rate control config: {}", path.display()))?;

        Ok(config)
    }

    /// Save config to disk, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}
