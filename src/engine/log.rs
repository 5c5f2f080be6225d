use anyhow::{Context, Result};
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use super::driver::FrameOutcome;

/// Append one line per finished frame to `path`, creating it if needed.
pub fn write_frame_log(path: &Path, outcome: &FrameOutcome) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open frame log: {}", path.display()))?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let qps = outcome
        .qps
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(",");
    writeln!(
        file,
        "[{}] frame={} layer={} type={} qp={} bits={} status={:?} disposition={:?}",
        timestamp,
        outcome.frame_number,
        outcome.layer,
        outcome.slice_type,
        qps,
        outcome.bits,
        outcome.status,
        outcome.disposition
    )?;
    Ok(())
}
