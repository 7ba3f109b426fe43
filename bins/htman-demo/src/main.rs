// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! htman demo
//!
//! Runs the particle simulation headless for a fixed number of frames and
//! optionally writes the last frame out as a PPM image.
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use htman_app_core::{ConfigService, RuntimePrefs};
use htman_config_fs::FsConfigStore;
use htman_particles::{FrameCapture, Simulation, SimulationConfig};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Worker threads (overrides saved prefs)
    #[clap(short, long)]
    threads: Option<usize>,

    /// Particle count (overrides saved prefs)
    #[clap(short, long)]
    particles: Option<usize>,

    /// Surface width in device pixels
    #[clap(long)]
    width: Option<u32>,

    /// Surface height in device pixels
    #[clap(long)]
    height: Option<u32>,

    /// Scheduler ticks per second
    #[clap(long)]
    tick_hz: Option<f64>,

    /// Frames to run before exiting
    #[clap(short, long, default_value_t = 120)]
    frames: u64,

    /// Give up after this many seconds
    #[clap(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Write the last frame to this path as a binary PPM
    #[clap(long)]
    dump: Option<PathBuf>,

    /// Ignore saved prefs and do not write any
    #[clap(long)]
    no_config: bool,

    /// Log at debug level
    #[clap(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, prefs: &mut RuntimePrefs) {
        if let Some(threads) = self.threads {
            prefs.threads = threads;
        }
        if let Some(particles) = self.particles {
            prefs.particles = particles;
        }
        if let Some(width) = self.width {
            prefs.width = width;
        }
        if let Some(height) = self.height {
            prefs.height = height;
        }
        if let Some(tick_hz) = self.tick_hz {
            prefs.tick_hz = tick_hz;
        }
    }
}

/// Saved prefs, or defaults when the store is unavailable or unreadable.
fn load_prefs() -> RuntimePrefs {
    let service = match FsConfigStore::new() {
        Ok(store) => ConfigService::new(store),
        Err(err) => {
            warn!(%err, "config store unavailable; using defaults");
            return RuntimePrefs::default();
        }
    };
    match service.load_or_init::<RuntimePrefs>(RuntimePrefs::KEY) {
        Ok(prefs) => prefs,
        Err(err) => {
            warn!(%err, "could not load runtime prefs; using defaults");
            RuntimePrefs::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let mut prefs = if args.no_config {
        RuntimePrefs::default()
    } else {
        load_prefs()
    };
    args.apply(&mut prefs);
    prefs.validate().context("invalid runtime prefs")?;

    let config = SimulationConfig::from_prefs(&prefs);
    info!(
        threads = config.workers,
        particles = config.particles,
        grid = %format_args!("{}x{}", config.grid.width, config.grid.height),
        tick_hz = config.tick_hz,
        frames = args.frames,
        "starting htman demo"
    );

    let capture = Arc::new(FrameCapture::new());
    let sim = Simulation::setup(config, capture.clone()).await?;
    let started = Instant::now();
    let outcome =
        tokio::time::timeout(Duration::from_secs(args.timeout_secs), sim.run_frames(args.frames))
            .await;
    sim.shutdown();

    let completed = match outcome {
        Ok(done) => done?,
        Err(_) => bail!(
            "gave up after {}s with {} of {} frames",
            args.timeout_secs,
            sim.frames_completed(),
            args.frames
        ),
    };
    let elapsed = started.elapsed();
    info!(
        frames = completed,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        fps = completed as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        "run finished"
    );

    if let Some(path) = &args.dump {
        let frame = capture.last().context("no frame was presented")?;
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        frame
            .write_ppm(BufWriter::new(file))
            .with_context(|| format!("writing {}", path.display()))?;
        info!(
            path = %path.display(),
            frame = frame.frame,
            lit = frame.lit_pixels(),
            "last frame written"
        );
    }

    Ok(())
}
