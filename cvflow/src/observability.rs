//! Tracing setup and timing helpers.

use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// Reads the filter from `RUST_LOG`, defaulting to `info`. Safe to call
/// more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Wall-clock timer for per-file driver logging.
#[derive(Debug)]
pub struct RunTimer {
    start: Instant,
}

impl RunTimer {
    /// Starts a timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed milliseconds since start.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for RunTimer {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_timer_advances() {
        let timer = RunTimer::start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5.0);
    }
}
