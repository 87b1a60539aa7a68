//! Per-phase timing metrics
//!
//! A lap timer measures each phase of the login flow, and a recorder
//! accumulates duration samples across all users. Summary statistics are
//! computed once at the end of a run.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// One named step of the login state machine.
///
/// `Login` is derived (`get-code` + `get-token`), never measured directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    OpenLoginPage,
    GetCode,
    GetToken,
    Login,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::OpenLoginPage => "open-login-page",
            Phase::GetCode => "get-code",
            Phase::GetToken => "get-token",
            Phase::Login => "login",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wall-clock lap timer.
///
/// Reset at the start of each phase, read at the phase's success or failure
/// boundary. Elapsed time is never cumulative across phases.
#[derive(Debug)]
pub struct LapTimer {
    start: Instant,
}

impl LapTimer {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    pub fn reset(&mut self) {
        self.start = Instant::now();
    }

    /// Milliseconds since the last reset.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Summary statistics for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSummary {
    pub count: usize,
    pub min: u64,
    pub median: u64,
    pub max: u64,
}

/// Accumulates per-phase duration samples across all users.
///
/// Only successfully completed phases contribute samples; a failed phase's
/// elapsed time is reported but never recorded here.
#[derive(Debug, Default)]
pub struct TimingRecorder {
    samples: BTreeMap<Phase, Vec<u64>>,
}

impl TimingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, phase: Phase, duration_ms: u64) {
        self.samples.entry(phase).or_default().push(duration_ms);
    }

    /// Number of samples recorded for a phase.
    pub fn sample_count(&self, phase: Phase) -> usize {
        self.samples.get(&phase).map_or(0, Vec::len)
    }

    /// Summarize one phase, or `None` if it has no samples.
    ///
    /// The median is the duration-sorted sample at index `count / 2` (floor
    /// division). This biased-for-even-counts definition matches the
    /// established output format and is kept as-is for compatibility.
    pub fn summarize(&self, phase: Phase) -> Option<PhaseSummary> {
        let samples = self.samples.get(&phase)?;
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.clone();
        sorted.sort_unstable();
        Some(PhaseSummary {
            count: sorted.len(),
            min: sorted[0],
            median: sorted[sorted.len() / 2],
            max: sorted[sorted.len() - 1],
        })
    }

    /// Summaries for every phase that has at least one sample.
    pub fn summarize_all(&self) -> BTreeMap<Phase, PhaseSummary> {
        self.samples
            .keys()
            .filter_map(|&phase| self.summarize(phase).map(|s| (phase, s)))
            .collect()
    }
}
