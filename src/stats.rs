//! Windowed mean and running minimum for one stream of latency samples.

use std::str::FromStr;

use log::trace;

use crate::freq::CpuFrequency;

/// How a window is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowPolicy {
    /// A full window is only noticed when the next sample arrives. That sample
    /// is not counted but seeds the next window's sum, so every window after the
    /// first divides `window + 1` values by `window`. The minimum reported with
    /// a window does not include the sample that closed it.
    #[default]
    Carryover,
    /// Non-overlapping windows of exactly `window` samples, emitted as soon as
    /// the last one arrives.
    Clean,
}

impl FromStr for WindowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "carryover" => Ok(Self::Carryover),
            "clean" => Ok(Self::Clean),
            other => Err(format!("unknown window policy `{other}`")),
        }
    }
}

/// One flushed window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Emission {
    pub mean_ns: f64,
    pub min_ns: f64,
}

#[derive(Debug, Clone)]
pub struct WindowStats {
    window: usize,
    policy: WindowPolicy,
    freq: CpuFrequency,
    sum_ns: f64,
    count: usize,
    min_cycles: u64,
    samples: u64,
}

impl WindowStats {
    pub fn new(window: usize, policy: WindowPolicy, freq: CpuFrequency) -> Self {
        assert!(window > 0, "window must hold at least one sample");
        Self {
            window,
            policy,
            freq,
            sum_ns: 0.0,
            count: 0,
            min_cycles: u64::MAX,
            samples: 0,
        }
    }

    /// Feeds one latency in cycles; returns the window it closed, if any.
    pub fn record(&mut self, cycles: u64) -> Option<Emission> {
        self.samples += 1;
        let ns = self.freq.cycles_to_ns(cycles);
        trace!("sample {} = {cycles} cycles ({ns:.2} ns)", self.samples);

        match self.policy {
            WindowPolicy::Carryover => {
                let emitted = if self.count < self.window {
                    self.sum_ns += ns;
                    self.count += 1;
                    None
                } else {
                    let e = self.emission(self.window);
                    self.count = 0;
                    self.sum_ns = ns;
                    Some(e)
                };
                self.min_cycles = self.min_cycles.min(cycles);
                emitted
            }
            WindowPolicy::Clean => {
                self.min_cycles = self.min_cycles.min(cycles);
                self.sum_ns += ns;
                self.count += 1;
                if self.count < self.window {
                    return None;
                }
                let e = self.emission(self.window);
                self.count = 0;
                self.sum_ns = 0.0;
                Some(e)
            }
        }
    }

    /// The partial window left at the end of a run, averaged over what it holds.
    /// Nothing is emitted for an empty window.
    pub fn finish(&self) -> Option<Emission> {
        if self.count == 0 {
            return None;
        }
        Some(self.emission(self.count))
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Lowest latency seen so far, in cycles.
    pub fn min_cycles(&self) -> Option<u64> {
        (self.samples > 0).then_some(self.min_cycles)
    }

    fn emission(&self, divisor: usize) -> Emission {
        Emission {
            mean_ns: self.sum_ns / divisor as f64,
            min_ns: self.freq.cycles_to_ns(self.min_cycles),
        }
    }
}
