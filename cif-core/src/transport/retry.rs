use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Bounds for the HTTP 429 retry loop. `None` means unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_attempts: Option<u32>,
  pub max_elapsed: Option<Duration>,
  pub default_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
      max_elapsed: None,
      default_delay: DEFAULT_RETRY_DELAY,
    }
  }
}

impl RetryPolicy {
  pub fn unbounded() -> Self {
    Self {
      max_attempts: None,
      max_elapsed: None,
      default_delay: DEFAULT_RETRY_DELAY,
    }
  }

  /// Seconds from the first `Retry-After` value, else the default delay.
  pub fn delay_for(&self, retry_after: Option<&str>) -> Duration {
    retry_after
      .and_then(|raw| raw.split(',').next())
      .and_then(|first| first.trim().parse::<u64>().ok())
      .map(Duration::from_secs)
      .unwrap_or(self.default_delay)
  }

  pub fn allows_retry(&self, attempts_made: u32, elapsed: Duration, delay: Duration) -> bool {
    if let Some(max) = self.max_attempts {
      if attempts_made >= max {
        return false;
      }
    }
    if let Some(limit) = self.max_elapsed {
      if elapsed.saturating_add(delay) > limit {
        return false;
      }
    }
    true
  }
}

pub trait Sleeper {
  /// Returns false if the wait was cancelled.
  fn sleep(&self, delay: Duration) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
  fn sleep(&self, delay: Duration) -> bool {
    std::thread::sleep(delay);
    true
  }
}

#[derive(Debug, Default)]
struct StopState {
  stopped: bool,
  waiting: usize,
}

/// Shared stop flag set from the Ctrl-C handler. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
  inner: Arc<(Mutex<StopState>, Condvar)>,
}

impl StopSignal {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the flag and wakes every retry wait. Returns true if at least one
  /// wait was in progress.
  pub fn request_stop(&self) -> bool {
    let mut state = self.state();
    state.stopped = true;
    let waiting = state.waiting > 0;
    drop(state);
    self.inner.1.notify_all();
    waiting
  }

  pub fn is_stopped(&self) -> bool {
    self.state().stopped
  }

  /// Number of retry waits currently blocked on this signal.
  pub fn waiting(&self) -> usize {
    self.state().waiting
  }

  fn state(&self) -> MutexGuard<'_, StopState> {
    self.inner.0.lock().unwrap_or_else(|p| p.into_inner())
  }
}

/// Retry waits that end early once the stop signal is raised. The lock is
/// released while waiting, so callers sharing one sleeper wait concurrently.
#[derive(Debug, Clone)]
pub struct SignalSleeper {
  signal: StopSignal,
}

impl SignalSleeper {
  pub fn new(signal: StopSignal) -> Self {
    Self { signal }
  }
}

impl Sleeper for SignalSleeper {
  fn sleep(&self, delay: Duration) -> bool {
    let mut state = self.signal.state();
    if state.stopped {
      return false;
    }
    state.waiting += 1;
    let (mut state, _) = self
      .signal
      .inner
      .1
      .wait_timeout_while(state, delay, |s| !s.stopped)
      .unwrap_or_else(|p| p.into_inner());
    state.waiting -= 1;

    if state.stopped {
      tracing::info!("stop requested; abandoning retry");
      return false;
    }
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread;
  use std::time::Instant;

  #[test]
  fn retry_after_takes_first_value() {
    let p = RetryPolicy::default();
    assert_eq!(p.delay_for(Some("3")), Duration::from_secs(3));
    assert_eq!(p.delay_for(Some(" 7 , 12")), Duration::from_secs(7));
    assert_eq!(p.delay_for(Some("Wed, 21 Oct 2015 07:28:00 GMT")), DEFAULT_RETRY_DELAY);
    assert_eq!(p.delay_for(None), DEFAULT_RETRY_DELAY);
  }

  #[test]
  fn unbounded_policy_always_allows_retry() {
    let p = RetryPolicy::unbounded();
    assert!(p.allows_retry(10_000, Duration::from_secs(86_400), Duration::from_secs(60)));
  }

  #[test]
  fn default_policy_caps_attempts() {
    let p = RetryPolicy::default();
    assert!(p.allows_retry(DEFAULT_MAX_ATTEMPTS - 1, Duration::ZERO, DEFAULT_RETRY_DELAY));
    assert!(!p.allows_retry(DEFAULT_MAX_ATTEMPTS, Duration::ZERO, DEFAULT_RETRY_DELAY));
  }

  #[test]
  fn stopped_signal_cancels_new_waits() {
    let signal = StopSignal::new();
    assert!(!signal.request_stop());
    assert!(signal.is_stopped());
    let sleeper = SignalSleeper::new(signal.clone());
    assert!(!sleeper.sleep(Duration::from_secs(30)));
    assert_eq!(signal.waiting(), 0);
  }

  #[test]
  fn signal_sleeper_completes_without_signal() {
    let sleeper = SignalSleeper::new(StopSignal::new());
    assert!(sleeper.sleep(Duration::from_millis(10)));
  }

  #[test]
  fn stop_wakes_a_waiting_retry() {
    let signal = StopSignal::new();
    let sleeper = SignalSleeper::new(signal.clone());
    let waiter = thread::spawn(move || sleeper.sleep(Duration::from_secs(30)));

    let started = Instant::now();
    while signal.waiting() == 0 {
      assert!(started.elapsed() < Duration::from_secs(5), "waiter never blocked");
      thread::sleep(Duration::from_millis(5));
    }
    assert!(signal.request_stop());
    assert!(!waiter.join().unwrap());
    assert!(started.elapsed() < Duration::from_secs(5));
  }

  #[test]
  fn shared_sleeper_waits_run_concurrently() {
    let sleeper = Arc::new(SignalSleeper::new(StopSignal::new()));
    let started = Instant::now();
    let handles: Vec<_> = (0..4)
      .map(|_| {
        let sleeper = Arc::clone(&sleeper);
        thread::spawn(move || sleeper.sleep(Duration::from_millis(300)))
      })
      .collect();
    for h in handles {
      assert!(h.join().unwrap());
    }
    assert!(started.elapsed() < Duration::from_millis(900));
  }
}
