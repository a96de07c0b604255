use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Enforces a minimum interval between successive calls to the same provider.
///
/// Keyed by [`Provider::capability_key`](crate::pipeline::transport::Provider::capability_key).
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last_call: HashMap<String, Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_call: HashMap::new(),
        }
    }

    /// Block until `key` may be called again, then record the call.
    ///
    /// Returns the time spent waiting.
    pub fn wait(&mut self, key: &str) -> Duration {
        let waited = match self.last_call.get(key) {
            Some(last) => {
                let remaining = self.interval.saturating_sub(last.elapsed());
                if !remaining.is_zero() {
                    tracing::debug!(key, wait_ms = remaining.as_millis() as u64, "Pacing provider call");
                    std::thread::sleep(remaining);
                }
                remaining
            }
            None => Duration::ZERO,
        };
        self.last_call.insert(key.to_string(), Instant::now());
        waited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_never_waits() {
        let mut pacer = Pacer::new(Duration::from_secs(60));
        assert_eq!(pacer.wait("a#m"), Duration::ZERO);
        assert_eq!(pacer.wait("b#m"), Duration::ZERO);
    }

    #[test]
    fn repeat_call_to_same_key_waits() {
        let mut pacer = Pacer::new(Duration::from_millis(40));
        pacer.wait("a#m");
        let start = Instant::now();
        let waited = pacer.wait("a#m");
        assert!(waited > Duration::ZERO);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn zero_interval_disables_pacing() {
        let mut pacer = Pacer::new(Duration::ZERO);
        pacer.wait("a#m");
        assert_eq!(pacer.wait("a#m"), Duration::ZERO);
    }
}
