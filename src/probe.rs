//! The interleaved measurement loop.

use std::io::Write;
use std::ptr;

use log::{debug, info, warn};

use crate::emit::Emitter;
use crate::error::Result;
use crate::freq::CpuFrequency;
use crate::stats::{WindowPolicy, WindowStats};
use crate::tsc::CycleClock;

/// Offset of the next byte to touch. Steps one page per touch and wraps at
/// `span`; when `step` divides `span` the offsets repeat every `span / step`.
#[derive(Debug, Clone)]
pub struct Cursor {
    offset: u64,
    step: u64,
    span: u64,
}

impl Cursor {
    pub fn new(step: u64, span: u64) -> Self {
        assert!(step > 0 && span > 0);
        Self { offset: 0, step, span }
    }

    /// Advances, then returns the new offset. The first offset handed out is
    /// `step % span`, never zero unless the step wraps.
    pub fn advance(&mut self) -> u64 {
        self.offset = (self.offset + self.step) % self.span;
        self.offset
    }

    pub fn span(&self) -> u64 {
        self.span
    }
}

/// One mapped region with its cursor, statistics and output.
pub struct Stream<'a, W: Write> {
    name: &'static str,
    bytes: &'a [u8],
    cursor: Cursor,
    stats: WindowStats,
    out: Emitter<W>,
}

impl<'a, W: Write> Stream<'a, W> {
    /// `logical_size` is clamped to `bytes.len()` so every offset stays mapped.
    pub fn new(
        name: &'static str,
        bytes: &'a [u8],
        logical_size: u64,
        page_size: u64,
        stats: WindowStats,
        out: Emitter<W>,
    ) -> Self {
        let span = logical_size.min(bytes.len() as u64);
        if span < logical_size {
            warn!(
                "{name}: offsets wrap at {span} bytes, the mapped length, instead of {logical_size}"
            );
        }
        Self { name, bytes, cursor: Cursor::new(page_size, span), stats, out }
    }

    /// Touches the next page, records its latency and flushes a full window.
    #[inline]
    pub fn sample<C: CycleClock>(&mut self, clock: &mut C) -> Result<u64> {
        let offset = self.cursor.advance() as usize;
        let cycles = measure(clock, &self.bytes[offset]);
        if let Some(e) = self.stats.record(cycles) {
            self.out.emit(&e)?;
        }
        Ok(cycles)
    }

    /// Emits whatever is left in the current window.
    pub fn finish(mut self) -> Result<(WindowStats, Emitter<W>)> {
        if let Some(e) = self.stats.finish() {
            self.out.emit(&e)?;
        }
        debug!(
            "{}: {} samples over a {} byte span, last window held {}, {} lines, min {:?} cycles",
            self.name,
            self.stats.samples(),
            self.cursor.span(),
            self.stats.count(),
            self.out.lines(),
            self.stats.min_cycles()
        );
        Ok((self.stats, self.out))
    }
}

/// Cycles spent loading `byte`.
#[inline(always)]
fn measure<C: CycleClock>(clock: &mut C, byte: &u8) -> u64 {
    let start = clock.begin();
    // SAFETY: `byte` is a live reference into the mapping.
    let value = unsafe { ptr::read_volatile(byte) };
    let end = clock.end();
    std::hint::black_box(value);
    end.cycles.saturating_sub(start)
}

#[derive(Debug, Clone, Copy)]
pub struct Plan {
    pub iterations: usize,
    pub reads_per_iteration: usize,
    pub window: usize,
    pub policy: WindowPolicy,
}

/// Runs `plan.iterations` rounds of `reads_per_iteration` large-stream samples
/// followed by one small-stream sample, then flushes both partial windows.
pub fn run<C, W1, W2>(
    clock: &mut C,
    plan: &Plan,
    mut large: Stream<'_, W1>,
    mut small: Stream<'_, W2>,
) -> Result<(Emitter<W1>, Emitter<W2>)>
where
    C: CycleClock,
    W1: Write,
    W2: Write,
{
    info!(
        "probing: {} iterations x ({} {} + 1 {}), window {} ({:?})",
        plan.iterations, plan.reads_per_iteration, large.name, small.name, plan.window, plan.policy
    );
    for _ in 0..plan.iterations {
        for _ in 0..plan.reads_per_iteration {
            large.sample(clock)?;
        }
        small.sample(clock)?;
    }
    let (_, large_out) = large.finish()?;
    let (_, small_out) = small.finish()?;
    info!("probing finished");
    Ok((large_out, small_out))
}

/// Builds the per-stream statistics for a plan.
pub fn stats_for(plan: &Plan, freq: CpuFrequency) -> WindowStats {
    WindowStats::new(plan.window, plan.policy, freq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsc::Stamp;
    use std::collections::VecDeque;

    /// Replays a fixed list of latencies, one per begin/end pair.
    struct Scripted {
        now: u64,
        latencies: VecDeque<u64>,
        reads: usize,
    }

    impl Scripted {
        fn new(latencies: impl IntoIterator<Item = u64>) -> Self {
            Self { now: 1_000, latencies: latencies.into_iter().collect(), reads: 0 }
        }
    }

    impl CycleClock for Scripted {
        fn begin(&mut self) -> u64 {
            self.reads += 1;
            self.now
        }

        fn end(&mut self) -> Stamp {
            self.now += self.latencies.pop_front().unwrap_or(1);
            Stamp { cycles: self.now, aux: 0 }
        }
    }

    fn ghz() -> CpuFrequency {
        CpuFrequency::from_mhz(1000.0).unwrap()
    }

    fn lines(out: Vec<u8>) -> Vec<String> {
        String::from_utf8(out).unwrap().lines().map(str::to_owned).collect()
    }

    #[test]
    fn cursor_steps_one_page_and_wraps() {
        let mut c = Cursor::new(4096, 4 * 4096);
        let offsets: Vec<u64> = (0..9).map(|_| c.advance()).collect();
        assert_eq!(offsets, vec![4096, 8192, 12288, 0, 4096, 8192, 12288, 0, 4096]);
    }

    #[test]
    fn cursor_period_is_span_over_step() {
        let (step, span) = (4096u64, 25 * 4096u64);
        let mut c = Cursor::new(step, span);
        let first: Vec<u64> = (0..span / step).map(|_| c.advance()).collect();
        let second: Vec<u64> = (0..span / step).map(|_| c.advance()).collect();
        assert_eq!(first, second);
        assert!(first.windows(2).all(|w| (w[0] + step) % span == w[1]));
        let mut sorted = first.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len() as u64, span / step);
    }

    #[test]
    fn logical_size_is_clamped_to_the_mapping() {
        let bytes = vec![0u8; 8192];
        let stream = Stream::new(
            "large",
            &bytes,
            160 * 1024 * 1024 * 1024,
            4096,
            WindowStats::new(4, WindowPolicy::Clean, ghz()),
            Emitter::new(Vec::new(), "out1"),
        );
        assert_eq!(stream.cursor.span(), 8192);
    }

    #[test]
    fn sample_measures_the_clock_delta() {
        let bytes = vec![1u8; 4 * 4096];
        let mut stream = Stream::new(
            "small",
            &bytes,
            bytes.len() as u64,
            4096,
            WindowStats::new(10, WindowPolicy::Clean, ghz()),
            Emitter::new(Vec::new(), "out2"),
        );
        let mut clock = Scripted::new([42, 17]);
        assert_eq!(stream.sample(&mut clock).unwrap(), 42);
        assert_eq!(stream.sample(&mut clock).unwrap(), 17);
    }

    #[test]
    fn interleaves_large_and_small_reads() {
        let large_bytes = vec![0u8; 64 * 4096];
        let small_bytes = vec![0u8; 4 * 4096];
        let plan =
            Plan { iterations: 7, reads_per_iteration: 3, window: 4, policy: WindowPolicy::Clean };

        // Every fourth latency belongs to the small stream.
        let latencies = (0..28u64).map(|i| if i % 4 == 3 { 1_000 + i } else { 10 + i });
        let mut clock = Scripted::new(latencies);

        let large = Stream::new(
            "large",
            &large_bytes,
            large_bytes.len() as u64,
            4096,
            stats_for(&plan, ghz()),
            Emitter::new(Vec::new(), "out1"),
        );
        let small = Stream::new(
            "small",
            &small_bytes,
            small_bytes.len() as u64,
            4096,
            stats_for(&plan, ghz()),
            Emitter::new(Vec::new(), "out2"),
        );
        let (large_out, small_out) = run(&mut clock, &plan, large, small).unwrap();
        assert_eq!(clock.reads, 28);

        // 21 large samples: five full windows of 4 and a final window of 1.
        let large_lines = lines(large_out.into_inner());
        assert_eq!(large_lines.len(), 6);
        // Large latencies are 10 + i for i not congruent to 3 mod 4: 10, 11, 12, 14, ...
        assert_eq!(large_lines[0], "11.75, 10.00");
        assert_eq!(large_lines[5], "36.00, 10.00");

        // 7 small samples: one full window and a final window of 3.
        let small_lines = lines(small_out.into_inner());
        assert_eq!(small_lines, vec!["1009.00, 1003.00", "1023.00, 1003.00"]);
    }

    #[test]
    fn carryover_run_keeps_the_compatible_line_count() {
        let bytes = vec![0u8; 16 * 4096];
        let plan = Plan {
            iterations: 10,
            reads_per_iteration: 1,
            window: 3,
            policy: WindowPolicy::Carryover,
        };
        let mut clock = Scripted::new(std::iter::repeat(5).take(20));
        let bytes = &bytes[..];
        let stream = move |name: &'static str, out: &'static str| {
            let stats = stats_for(&plan, ghz());
            Stream::new(name, bytes, 16 * 4096, 4096, stats, Emitter::new(Vec::new(), out))
        };
        let (large, small) = (stream("large", "out1"), stream("small", "out2"));
        let (large_out, _) = run(&mut clock, &plan, large, small).unwrap();

        // Windows close on samples 4 and 8 (1-based). Sample 8 seeds the last
        // window, which samples 9 and 10 join: 15 over a count of 2.
        let got = lines(large_out.into_inner());
        assert_eq!(got, vec!["5.00, 5.00", "6.67, 5.00", "7.50, 5.00"]);
    }
}
