use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{ProbeError, Result};

pub const CPUINFO: &str = "/proc/cpuinfo";

/// Counter frequency used to turn cycle deltas into nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuFrequency {
    hz: f64,
}

impl CpuFrequency {
    pub fn from_mhz(mhz: f64) -> Result<Self> {
        if !mhz.is_finite() || mhz <= 0.0 {
            return Err(ProbeError::Frequency(format!("{mhz} MHz is not a usable clock rate")));
        }
        Ok(Self { hz: mhz * 1e6 })
    }

    /// Reads the first `cpu MHz` entry of a cpuinfo-formatted file.
    pub fn from_cpuinfo(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| ProbeError::Frequency(format!("reading {}: {e}", path.display())))?;
        let mhz = parse_cpu_mhz(&text).ok_or_else(|| {
            ProbeError::Frequency(format!("no cpu MHz entry in {}", path.display()))
        })?;
        debug!("{} reports {mhz} MHz", path.display());
        Self::from_mhz(mhz)
    }

    pub fn hz(&self) -> f64 {
        self.hz
    }

    pub fn cycles_to_ns(&self, cycles: u64) -> f64 {
        cycles as f64 * 1e9 / self.hz
    }
}

fn parse_cpu_mhz(cpuinfo: &str) -> Option<f64> {
    cpuinfo.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim() != "cpu MHz" {
            return None;
        }
        value.trim().parse().ok()
    })
}
