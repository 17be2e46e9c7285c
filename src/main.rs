mod config;
mod emit;
mod error;
mod freq;
mod mapping;
mod probe;
mod stats;
mod tsc;
mod vmtouch;

use anyhow::Context;
use env_logger::Env;
use log::{debug, error, info};

use crate::config::Config;
use crate::emit::Emitter;
use crate::freq::CpuFrequency;
use crate::mapping::{MappedFile, Residency};
use crate::probe::{Plan, Stream};
use crate::tsc::{CycleClock, Tsc};
use crate::vmtouch::PageCacheTool;

const RULE: &str = "==========================================";

fn main() {
    // Use RUST_LOG=debug for per-window output, RUST_LOG=trace for every sample.
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let code = match config::parse_config().map_err(anyhow::Error::from).and_then(|c| run(&c)) {
        Ok(()) => 0,
        Err(e) => {
            error!("{e:#}");
            1
        }
    };
    std::process::exit(code);
}

fn run(config: &Config) -> anyhow::Result<()> {
    debug!("{config:?}");

    let freq = match config.cpu_mhz {
        Some(mhz) => CpuFrequency::from_mhz(mhz)?,
        None => CpuFrequency::from_cpuinfo(freq::CPUINFO)?,
    };
    info!("counter frequency {:.0} Hz", freq.hz());

    let large = MappedFile::open(&config.large, Residency::Cold)
        .context("setting up the large file")?;
    let small = MappedFile::open(&config.small, Residency::Pinned)
        .context("setting up the small file")?;
    for file in [&large, &small] {
        debug!("{}: {} bytes, {:?}", file.path().display(), file.len(), file.residency());
    }

    let tool = config.vmtouch.clone().map(PageCacheTool::new);
    if let Some(tool) = &tool {
        tool.warm(small.path())?;
        residency_report(tool, "Before read file", &[&large, &small]);
        println!();
    }

    let large_out = Emitter::create(&config.large_out)?;
    let small_out = Emitter::create(&config.small_out)?;

    let plan = Plan {
        iterations: config.iterations,
        reads_per_iteration: config.reads_per_iteration,
        window: config.window,
        policy: config.policy,
    };
    let large_stream = Stream::new(
        "large",
        large.bytes(),
        config.large_size,
        config.page_size,
        probe::stats_for(&plan, freq),
        large_out,
    );
    let small_stream = Stream::new(
        "small",
        small.bytes(),
        config.small_size,
        config.page_size,
        probe::stats_for(&plan, freq),
        small_out,
    );
    let mut clock = Tsc::new();
    debug!("reading the cycle counter on core {}", clock.end().core());
    let (large_out, small_out) = probe::run(&mut clock, &plan, large_stream, small_stream)?;
    info!(
        "wrote {} lines to {} and {} lines to {}",
        large_out.lines(),
        config.large_out.display(),
        small_out.lines(),
        config.small_out.display()
    );

    if let Some(tool) = &tool {
        residency_report(tool, "After read file", &[&large, &small]);
    }

    large.release()?;
    small.release()?;
    info!("done");
    Ok(())
}

fn residency_report(tool: &PageCacheTool, title: &str, files: &[&MappedFile]) {
    println!("{RULE}");
    println!("{title}");
    for file in files {
        tool.report(file.path());
    }
    println!("{RULE}");
}
