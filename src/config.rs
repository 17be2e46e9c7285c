use std::ffi::OsString;
use std::path::PathBuf;
use std::str::FromStr;

use clap::{App, Arg, ArgMatches};

use crate::error::{ProbeError, Result};
use crate::stats::WindowPolicy;

pub const LARGE_SIZE: u64 = 160 * 1024 * 1024 * 1024;
pub const SMALL_SIZE: u64 = 100 * 1024 * 1024;
pub const ITERATIONS: usize = 419_444;
pub const READS_PER_ITERATION: usize = 100;
pub const WINDOW: usize = 10_000;
pub const PAGE_SIZE: u64 = 4 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Cold file, sampled `reads_per_iteration` times per iteration.
    pub large: PathBuf,
    /// Pinned and prefetched file, sampled once per iteration.
    pub small: PathBuf,
    pub large_out: PathBuf,
    pub small_out: PathBuf,
    /// Logical sizes the offset cursors wrap at.
    pub large_size: u64,
    pub small_size: u64,
    pub iterations: usize,
    pub reads_per_iteration: usize,
    pub window: usize,
    pub page_size: u64,
    pub policy: WindowPolicy,
    /// Skips `/proc/cpuinfo` when set.
    pub cpu_mhz: Option<f64>,
    /// `None` disables the page-cache tool.
    pub vmtouch: Option<OsString>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            large: "./file1".into(),
            small: "./file2".into(),
            large_out: "./out1".into(),
            small_out: "./out2".into(),
            large_size: LARGE_SIZE,
            small_size: SMALL_SIZE,
            iterations: ITERATIONS,
            reads_per_iteration: READS_PER_ITERATION,
            window: WINDOW,
            page_size: PAGE_SIZE,
            policy: WindowPolicy::Carryover,
            cpu_mhz: None,
            vmtouch: Some("vmtouch".into()),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("large-size", self.large_size),
            ("small-size", self.small_size),
            ("iterations", self.iterations as u64),
            ("reads", self.reads_per_iteration as u64),
            ("window", self.window as u64),
            ("page-size", self.page_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ProbeError::Config(format!("--{name} must be greater than zero")));
            }
        }
        Ok(())
    }
}

/// Defaults live in `Config::default`; clap only sees the flags.
fn app() -> App<'static, 'static> {
    App::new("memlat")
        .about("Per-access latency of a cold and a pinned memory-mapped file")
        .arg(path_arg("large", "large file, left cold [default: ./file1]"))
        .arg(path_arg("small", "small file, pinned and prefetched [default: ./file2]"))
        .arg(path_arg("large-out", "output for the large file's windows [default: ./out1]"))
        .arg(path_arg("small-out", "output for the small file's windows [default: ./out2]"))
        .arg(num_arg("large-size", "bytes the large file's offsets wrap at [default: 160 GiB]"))
        .arg(num_arg("small-size", "bytes the small file's offsets wrap at [default: 100 MiB]"))
        .arg(num_arg("iterations", "outer iterations, one small-file read each").short("i"))
        .arg(num_arg("reads", "large-file reads per iteration").short("r"))
        .arg(num_arg("window", "samples per emitted line").short("w"))
        .arg(num_arg("page-size", "offset step in bytes"))
        .arg(
            Arg::with_name("policy")
                .long("policy")
                .takes_value(true)
                .possible_values(&["carryover", "clean"])
                .help("carryover (default) seeds each window with the sample closing the last one"),
        )
        .arg(num_arg("cpu-mhz", "counter frequency, instead of reading /proc/cpuinfo"))
        .arg(path_arg("vmtouch", "page-cache tool [default: vmtouch]"))
        .arg(
            Arg::with_name("no-vmtouch")
                .long("no-vmtouch")
                .help("neither prefetch the small file nor report residency"),
        )
}

fn path_arg(name: &'static str, help: &'static str) -> Arg<'static, 'static> {
    Arg::with_name(name).long(name).value_name("PATH").takes_value(true).help(help)
}

fn num_arg(name: &'static str, help: &'static str) -> Arg<'static, 'static> {
    Arg::with_name(name).long(name).value_name("N").takes_value(true).help(help)
}

/// Parses the process arguments.
pub fn parse_config() -> Result<Config> {
    from_matches(&app().get_matches())
}

pub fn parse_from<I, T>(args: I) -> Result<Config>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = app().get_matches_from_safe(args).map_err(|e| ProbeError::Config(e.message))?;
    from_matches(&matches)
}

fn from_matches(m: &ArgMatches) -> Result<Config> {
    let d = Config::default();
    let config = Config {
        large: path(m, "large").unwrap_or(d.large),
        small: path(m, "small").unwrap_or(d.small),
        large_out: path(m, "large-out").unwrap_or(d.large_out),
        small_out: path(m, "small-out").unwrap_or(d.small_out),
        large_size: parsed(m, "large-size")?.unwrap_or(d.large_size),
        small_size: parsed(m, "small-size")?.unwrap_or(d.small_size),
        iterations: parsed(m, "iterations")?.unwrap_or(d.iterations),
        reads_per_iteration: parsed(m, "reads")?.unwrap_or(d.reads_per_iteration),
        window: parsed(m, "window")?.unwrap_or(d.window),
        page_size: parsed(m, "page-size")?.unwrap_or(d.page_size),
        policy: parsed(m, "policy")?.unwrap_or(d.policy),
        cpu_mhz: parsed(m, "cpu-mhz")?.or(d.cpu_mhz),
        vmtouch: if m.is_present("no-vmtouch") {
            None
        } else {
            m.value_of_os("vmtouch").map(OsString::from).or(d.vmtouch)
        },
    };
    config.validate()?;
    Ok(config)
}

fn path(m: &ArgMatches, name: &str) -> Option<PathBuf> {
    m.value_of_os(name).map(PathBuf::from)
}

fn parsed<T>(m: &ArgMatches, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    m.value_of(name)
        .map(|v| v.parse().map_err(|e| ProbeError::Config(format!("--{name} {v}: {e}"))))
        .transpose()
}
