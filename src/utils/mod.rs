use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Stopwatch for one run. Finishing consumes it and logs the wall-clock
/// duration; an abandoned stopwatch logs nothing.
pub struct RunTimer {
    label: &'static str,
    started: Instant,
}

impl RunTimer {
    pub fn start(label: &'static str) -> Self {
        debug!("{} started", label);
        Self {
            label,
            started: Instant::now(),
        }
    }

    pub fn finish(self) -> Duration {
        let elapsed = self.started.elapsed();
        info!("{} took {:.2?}", self.label, elapsed);
        elapsed
    }
}

/// Format an integer with thousands separators for the stats printout.
pub fn fmt_number(n: i64) -> String {
    let digits = n.abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    let lead = digits.len() % 3;
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (i + 3 - lead) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if n < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}
