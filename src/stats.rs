// Rate-control statistics and persistence

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::engine::{Disposition, FrameOutcome, HrdState, PerSlice, SliceType};

/// Totals over every simulation ever run on this machine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LifetimeStats {
    /// Number of completed simulation runs
    pub total_runs: u64,

    /// Frames accepted across all runs
    pub total_frames: u64,

    /// Encode attempts across all runs, retries included
    pub total_attempts: u64,

    /// Bits produced by accepted frames
    pub total_bits: u64,

    /// Frames kept despite an HRD violation
    pub total_violations: u64,

    /// Last updated timestamp (RFC 3339)
    pub last_updated: Option<String>,
}

/// Statistics of one encode session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub frames: u64,
    pub attempts: u64,
    pub total_bits: u64,

    /// Frames accepted only after at least one re-encode
    pub retried_frames: u64,

    /// Frames latched at a QP limit
    pub latched: u64,

    /// Frames kept after exhausting the retry budget
    pub retry_limit: u64,

    pub frames_per_type: PerSlice<u64>,
    qp_sum: PerSlice<u64>,

    /// Lowest and highest HRD fullness seen after a frame, in percent
    pub min_fullness_pct: Option<f64>,
    pub max_fullness_pct: Option<f64>,

    #[serde(skip)]
    pub session_start: Instant,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            frames: 0,
            attempts: 0,
            total_bits: 0,
            retried_frames: 0,
            latched: 0,
            retry_limit: 0,
            frames_per_type: PerSlice::splat(0),
            qp_sum: PerSlice::splat(0),
            min_fullness_pct: None,
            max_fullness_pct: None,
            session_start: Instant::now(),
        }
    }
}

impl SessionStats {
    /// Account a finished frame. `hrd` is the state of its layer afterwards.
    pub fn record(&mut self, outcome: &FrameOutcome, hrd: Option<&HrdState>) {
        self.frames += 1;
        self.attempts += u64::from(outcome.attempts());
        self.total_bits += u64::from(outcome.bits);
        if outcome.attempts() > 1 {
            self.retried_frames += 1;
        }
        match outcome.disposition {
            Disposition::Accepted => {}
            Disposition::Latched => self.latched += 1,
            Disposition::RetryLimit => self.retry_limit += 1,
        }

        self.frames_per_type[outcome.slice_type] += 1;
        self.qp_sum[outcome.slice_type] += u64::from(outcome.qp());

        if let Some(hrd) = hrd {
            let pct = hrd.fullness_pct();
            self.min_fullness_pct = Some(self.min_fullness_pct.map_or(pct, |m| m.min(pct)));
            self.max_fullness_pct = Some(self.max_fullness_pct.map_or(pct, |m| m.max(pct)));
        }
    }

    /// Mean QP of accepted frames of `slice_type`.
    pub fn average_qp(&self, slice_type: SliceType) -> Option<f64> {
        let frames = self.frames_per_type[slice_type];
        (frames > 0).then(|| self.qp_sum[slice_type] as f64 / frames as f64)
    }

    /// Average bitrate of the session at `framerate` pictures per second.
    pub fn achieved_bitrate(&self, framerate: f64) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.total_bits as f64 * framerate / self.frames as f64
        }
    }

    pub fn violations(&self) -> u64 {
        self.latched + self.retry_limit
    }

    /// Format wall time spent in this session
    pub fn format_elapsed(&self) -> String {
        format_duration(self.session_start.elapsed().as_secs_f64())
    }
}

impl LifetimeStats {
    /// Get the path to the stats file
    pub fn stats_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("vabrc");

        Ok(config_dir.join("stats.json"))
    }

    /// Load stats from `path`, or return default if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read stats file: {}", path.display()))?;

            let stats: LifetimeStats = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse stats file: {}", path.display()))?;

            Ok(stats)
        } else {
            Ok(LifetimeStats::default())
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::stats_path()?)
    }

    /// Save stats to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize stats")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write stats file: {}", path.display()))?;

        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::stats_path()?)
    }

    /// Fold a finished session into the totals
    pub fn absorb(&mut self, session: &SessionStats) {
        self.total_runs += 1;
        self.total_frames += session.frames;
        self.total_attempts += session.attempts;
        self.total_bits += session.total_bits;
        self.total_violations += session.violations();
        self.last_updated = Some(chrono::Local::now().to_rfc3339());
    }

    /// Average encode attempts per frame
    pub fn attempts_per_frame(&self) -> f64 {
        if self.total_frames == 0 {
            0.0
        } else {
            self.total_attempts as f64 / self.total_frames as f64
        }
    }
}

/// Format a bitrate in bits per second as a human-readable string
pub fn format_bitrate(bps: f64) -> String {
    const KBPS: f64 = 1000.0;
    const MBPS: f64 = KBPS * 1000.0;
    const GBPS: f64 = MBPS * 1000.0;

    if bps >= GBPS {
        format!("{:.2} Gbit/s", bps / GBPS)
    } else if bps >= MBPS {
        format!("{:.2} Mbit/s", bps / MBPS)
    } else if bps >= KBPS {
        format!("{:.2} kbit/s", bps / KBPS)
    } else {
        format!("{:.0} bit/s", bps)
    }
}

/// Format duration in seconds as human-readable time
pub fn format_duration(seconds: f64) -> String {
    let total_secs = seconds as u64;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
