use std::time::Instant;

/// Monotonic stopwatch for one pipeline stage.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Timer {
            start: Instant::now(),
        }
    }

    /// Elapsed time since the timer was started, in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

/// Ordered log of named stage durations for a single request.
///
/// Entries are append-only and render in capture order, so the header
/// preserves the sequence in which stages actually ran.
#[derive(Debug, Default)]
pub struct Timings {
    entries: Vec<(&'static str, f64)>,
}

impl Timings {
    pub fn new() -> Self {
        Timings::default()
    }

    pub fn record(&mut self, label: &'static str, millis: f64) {
        self.entries.push((label, millis));
    }

    /// Render as a `Server-Timing` header value: `name;dur=12.34, ...`
    pub fn header_value(&self) -> String {
        self.entries
            .iter()
            .map(|(label, millis)| format!("{label};dur={millis:.2}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
