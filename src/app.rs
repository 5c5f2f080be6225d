use crate::cli::{Cli, Commands, ConfigArgs};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use vabrc::config::RateControlConfig;
use vabrc::engine::{
    self, BrcState, EncodeDriver, HrdState, HrdTiming, SliceType, SyntheticPipeline,
};
use vabrc::stats::{LifetimeStats, SessionStats, format_bitrate};

pub fn run(cli: Cli) {
    let result = match cli.command {
        Commands::Init { config } => handle_init(config),
        Commands::Simulate {
            config,
            frames,
            seed,
            complexity,
            noise,
            scene_change_every,
            frame_log,
            save_stats,
            json,
        } => handle_simulate(SimulateArgs {
            config,
            frames,
            seed,
            complexity,
            noise,
            scene_change_every,
            frame_log,
            save_stats,
            json,
        }),
        Commands::Stats => handle_stats(),
        Commands::InitConfig { path } => handle_init_config(path),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

/// Explicit config file, else the user config if present, else defaults,
/// with command-line overrides applied on top.
fn load_config(args: ConfigArgs) -> Result<RateControlConfig> {
    let mut config = match args.config {
        Some(path) => RateControlConfig::load(&path)?,
        None => {
            let default_path = RateControlConfig::default_path()?;
            if default_path.exists() {
                RateControlConfig::load(&default_path)?
            } else {
                RateControlConfig::default()
            }
        }
    };

    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(codec) = args.codec {
        config.codec = codec;
    }
    if let Some(bitrate) = args.bitrate {
        if let Some(top) = config.layers.last_mut() {
            top.bitrate = bitrate;
        }
    }

    config.validate().context("Invalid rate control settings")?;
    Ok(config)
}

#[derive(Serialize)]
struct LayerReport<'a> {
    layer: usize,
    hrd: &'a HrdState,
    brc: &'a BrcState,
}

#[derive(Serialize)]
struct InitReport<'a> {
    config: &'a RateControlConfig,
    layers: Vec<LayerReport<'a>>,
    timing: Option<HrdTiming>,
}

fn handle_init(config: ConfigArgs) -> Result<()> {
    let config = load_config(config)?;
    let rc = engine::BrcEngine::with_config(&config).context("Failed to initialize rate control")?;

    let layers = rc.layers();
    let report = InitReport {
        config: &config,
        layers: layers
            .hrd
            .iter()
            .zip(&layers.brc)
            .enumerate()
            .map(|(layer, (hrd, brc))| LayerReport { layer, hrd, brc })
            .collect(),
        timing: rc.timing().cloned(),
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize initial state")?
    );
    Ok(())
}

struct SimulateArgs {
    config: ConfigArgs,
    frames: u64,
    seed: u64,
    complexity: f64,
    noise: f64,
    scene_change_every: Option<u64>,
    frame_log: Option<PathBuf>,
    save_stats: bool,
    json: bool,
}

#[derive(Serialize)]
struct SimulateReport<'a> {
    mode: String,
    target_bitrate: u64,
    achieved_bitrate: f64,
    average_qp_i: Option<f64>,
    average_qp_p: Option<f64>,
    average_qp_b: Option<f64>,
    encodes: u64,
    session: &'a SessionStats,
}

fn handle_simulate(args: SimulateArgs) -> Result<()> {
    let config = load_config(args.config)?;

    let mut pipeline = SyntheticPipeline::new(&config, args.seed)
        .with_complexity(args.complexity)
        .with_noise(args.noise);
    if let Some(every) = args.scene_change_every {
        pipeline = pipeline.with_scene_changes(every, 4.0);
    }

    let mut driver = EncodeDriver::with_config(&config, pipeline)
        .context("Failed to initialize rate control")?;
    let mut session = SessionStats::default();

    for index in 0..args.frames {
        let slice_type = config.gop.slice_type_at(index);
        let outcome = driver
            .encode_frame(slice_type)
            .with_context(|| format!("Simulation stopped at frame {}", index))?;

        if let Some(path) = &args.frame_log {
            engine::log::write_frame_log(path, &outcome)?;
        }
        session.record(&outcome, driver.engine().hrd(outcome.layer));
    }

    let framerate = config.layers.last().map(|l| l.framerate()).unwrap_or(0.0);
    let report = SimulateReport {
        mode: config.mode.to_string(),
        target_bitrate: config.top_bitrate(),
        achieved_bitrate: session.achieved_bitrate(framerate),
        average_qp_i: session.average_qp(SliceType::I),
        average_qp_p: session.average_qp(SliceType::P),
        average_qp_b: session.average_qp(SliceType::B),
        encodes: driver.pipeline().encodes(),
        session: &session,
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize summary")?
        );
    } else {
        print_summary(&report);
    }

    if args.save_stats {
        save_lifetime(&session)?;
    }
    Ok(())
}

fn print_summary(report: &SimulateReport<'_>) {
    let session = report.session;
    let qp = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |q| format!("{:.1}", q));

    println!("{} simulation, {} frames in {}", report.mode, session.frames, session.format_elapsed());
    println!(
        "  bitrate: {} achieved, {} target",
        format_bitrate(report.achieved_bitrate),
        format_bitrate(report.target_bitrate as f64)
    );
    println!(
        "  average QP: I {}  P {}  B {}",
        qp(report.average_qp_i),
        qp(report.average_qp_p),
        qp(report.average_qp_b)
    );
    println!(
        "  encodes: {} ({} frames retried)",
        report.encodes, session.retried_frames
    );
    println!(
        "  violations: {} latched, {} at retry limit",
        session.latched, session.retry_limit
    );
    if let (Some(min), Some(max)) = (session.min_fullness_pct, session.max_fullness_pct) {
        println!("  HRD fullness: {:.1}% .. {:.1}%", min, max);
    }
}

fn save_lifetime(session: &SessionStats) -> Result<()> {
    let mut lifetime = LifetimeStats::load().unwrap_or_default();
    lifetime.absorb(session);
    lifetime.save()
}

fn handle_stats() -> Result<()> {
    let stats = LifetimeStats::load()?;
    println!("Runs:               {}", stats.total_runs);
    println!("Frames:             {}", stats.total_frames);
    println!("Attempts per frame: {:.2}", stats.attempts_per_frame());
    println!("Violations:         {}", stats.total_violations);
    if let Some(updated) = &stats.last_updated {
        println!("Last updated:       {}", updated);
    }
    Ok(())
}

fn handle_init_config(path: Option<PathBuf>) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => RateControlConfig::default_path()?,
    };

    match RateControlConfig::load(&path) {
        Ok(cfg) => {
            println!("Config loaded successfully from {}", path.display());
            println!("{:#?}", cfg);
            Ok(())
        }
        Err(e) => {
            println!("Config missing or invalid: {:#}", e);
            println!("Creating default config...");
            write_default_config(&path)?;
            println!("Default config saved to {}", path.display());
            Ok(())
        }
    }
}

fn write_default_config(path: &Path) -> Result<()> {
    RateControlConfig::default()
        .save(path)
        .context("Failed to save default config")
}
