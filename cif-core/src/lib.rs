pub mod api;
pub mod config;
pub mod console;
pub mod logging;
pub mod normalize;
pub mod paths;
pub mod transport;

use transport::{SignalSleeper, StopSignal};

/// Exit status after Ctrl-C outside a retry wait (128 + SIGINT).
const EXIT_INTERRUPTED: i32 = 130;

pub fn run_console(args: &[String]) -> anyhow::Result<()> {
  let invocation = console::parse_args(args)?;
  if invocation.command == console::Command::Help {
    console::print_help();
    return Ok(());
  }

  let base = paths::base_dir()?;
  let config_path = paths::config_path(&base);
  let mut cfg = config::load_or_create_default(&config_path)?;

  logging::init(
    &paths::logs_dir(&base),
    &cfg.logging,
    logging::Output::for_verbosity(invocation.globals.verbose || cfg.client.verbose),
  )?;

  let stop = StopSignal::new();
  let handler_stop = stop.clone();
  ctrlc::set_handler(move || {
    if let Some(code) = interrupt(&handler_stop) {
      eprintln!("cif-client: interrupted");
      std::process::exit(code);
    }
  })?;

  console::run(
    &mut cfg,
    &config_path,
    invocation,
    SignalSleeper::new(stop),
  )
}

/// Ctrl-C during a retry wait cancels the wait and lets the command fail with
/// `Cancelled`; anywhere else it ends the process with the returned status.
fn interrupt(stop: &StopSignal) -> Option<i32> {
  if stop.request_stop() {
    None
  } else {
    Some(EXIT_INTERRUPTED)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::transport::Sleeper;
  use std::thread;
  use std::time::{Duration, Instant};

  #[test]
  fn interrupt_outside_retry_wait_exits() {
    let stop = StopSignal::new();
    assert_eq!(interrupt(&stop), Some(EXIT_INTERRUPTED));
  }

  #[test]
  fn interrupt_during_retry_wait_cancels_it() {
    let stop = StopSignal::new();
    let sleeper = SignalSleeper::new(stop.clone());
    let waiter = thread::spawn(move || sleeper.sleep(Duration::from_secs(30)));

    let started = Instant::now();
    while stop.waiting() == 0 {
      assert!(started.elapsed() < Duration::from_secs(5), "waiter never blocked");
      thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(interrupt(&stop), None);
    assert!(!waiter.join().unwrap());
  }
}
