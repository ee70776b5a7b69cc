use std::fmt::Display;
use std::thread;
use std::time::Duration;

/// Bounded retries with a fixed delay in between.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts.
    pub attempts: u32,
    /// Seconds to wait between two attempts.
    pub delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_secs: 5,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    /// Runs `op` until it succeeds or all attempts are used up.
    ///
    /// `op` receives the 1-based attempt number. Returns whether an attempt
    /// succeeded.
    pub fn run<E: Display>(&self, what: &str, mut op: impl FnMut(u32) -> Result<(), E>) -> bool {
        let attempts = self.attempts.max(1);
        for attempt in 1..=attempts {
            match op(attempt) {
                Ok(()) => return true,
                Err(e) => {
                    log::warn!(target: "util::retry", "{what} failed (attempt {attempt}/{attempts}): {e}");
                    if attempt < attempts {
                        thread::sleep(self.delay());
                    }
                }
            }
        }

        log::error!(target: "util::retry", "{what} failed after {attempts} attempts");
        false
    }
}
