//! Hardware cycle counter.
//!
//! The access under measurement sits between [`CycleClock::begin`] and
//! [`CycleClock::end`]. `begin` is a plain `rdtsc` so the load that follows is
//! not held back by a serializing instruction; `end` is `rdtscp`, which waits
//! for every earlier instruction (the load included) to retire before it reads
//! the counter.

/// Counter value taken after an access, with the core it was read on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub cycles: u64,
    /// `IA32_TSC_AUX`; Linux stores the cpu number in the low 12 bits.
    pub aux: u32,
}

impl Stamp {
    pub fn core(&self) -> u32 {
        self.aux & 0xfff
    }
}

pub trait CycleClock {
    /// Non-serializing read, taken before the access.
    fn begin(&mut self) -> u64;
    /// Serializing read, taken after the access.
    fn end(&mut self) -> Stamp;
}

/// Time-stamp counter of the current core.
#[derive(Debug, Default)]
pub struct Tsc {
    #[cfg(not(target_arch = "x86_64"))]
    origin: Option<std::time::Instant>,
}

impl Tsc {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(target_arch = "x86_64")]
impl CycleClock for Tsc {
    #[inline(always)]
    fn begin(&mut self) -> u64 {
        // SAFETY: rdtsc is available on every x86_64 cpu.
        unsafe { core::arch::x86_64::_rdtsc() }
    }

    #[inline(always)]
    fn end(&mut self) -> Stamp {
        let mut aux = 0u32;
        // SAFETY: rdtscp is available on every x86_64 cpu Linux still boots on.
        let cycles = unsafe { core::arch::x86_64::__rdtscp(&mut aux) };
        Stamp { cycles, aux }
    }
}

// No cycle counter we can read from user space; nanoseconds since the first
// read stand in for cycles, so run with `--cpu-mhz 1000` on these targets.
#[cfg(not(target_arch = "x86_64"))]
impl CycleClock for Tsc {
    fn begin(&mut self) -> u64 {
        let origin = *self.origin.get_or_insert_with(std::time::Instant::now);
        origin.elapsed().as_nanos() as u64
    }

    fn end(&mut self) -> Stamp {
        Stamp { cycles: self.begin(), aux: 0 }
    }
}
