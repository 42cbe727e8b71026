use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{Days, Local, NaiveDate};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

const LOG_FILE_NAME: &str = "cif-client.log";
const DEFAULT_LEVEL: &str = "info";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where diagnostics go besides the rolling file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
  FileOnly,
  FileAndStderr,
}

impl Output {
  pub fn for_verbosity(verbose: bool) -> Self {
    if verbose {
      Output::FileAndStderr
    } else {
      Output::FileOnly
    }
  }
}

pub fn init(log_dir: &Path, cfg: &LoggingConfig, output: Output) -> anyhow::Result<()> {
  fs::create_dir_all(log_dir)?;
  let removed = prune_logs(log_dir, cfg.retention_days, Local::now().date_naive());

  let (file_writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME));
  let _ = FILE_GUARD.set(guard);

  let file_layer = tracing_subscriber::fmt::layer()
    .with_ansi(false)
    .with_writer(file_writer)
    .with_target(true);

  // stderr: compact, no timestamps
  let stderr_layer = (output == Output::FileAndStderr).then(|| {
    tracing_subscriber::fmt::layer()
      .compact()
      .without_time()
      .with_target(false)
      .with_writer(std::io::stderr)
  });

  tracing_subscriber::registry()
    .with(level_filter(&cfg.level))
    .with(file_layer)
    .with(stderr_layer)
    .try_init()?;

  if removed > 0 {
    tracing::debug!(removed, "pruned expired log files");
  }
  Ok(())
}

fn level_filter(level: &str) -> EnvFilter {
  EnvFilter::try_new(level.trim()).unwrap_or_else(|_| {
    eprintln!("cif-client: invalid logging.level `{level}`; using `{DEFAULT_LEVEL}`.");
    EnvFilter::new(DEFAULT_LEVEL)
  })
}

/// Removes rolled files whose date suffix is older than `retention_days`
/// before `today`. Returns how many were removed.
fn prune_logs(log_dir: &Path, retention_days: u64, today: NaiveDate) -> usize {
  if retention_days == 0 {
    return 0;
  }
  let Some(cutoff) = today.checked_sub_days(Days::new(retention_days)) else {
    return 0;
  };
  let Ok(entries) = fs::read_dir(log_dir) else {
    return 0;
  };

  entries
    .flatten()
    .filter(|entry| {
      entry
        .file_name()
        .to_str()
        .and_then(rolled_log_date)
        .is_some_and(|date| date < cutoff)
    })
    .filter(|entry| fs::remove_file(entry.path()).is_ok())
    .count()
}

/// Date of a file written by the daily appender, `cif-client.log.YYYY-MM-DD`.
fn rolled_log_date(name: &str) -> Option<NaiveDate> {
  let suffix = name.strip_prefix(LOG_FILE_NAME)?.strip_prefix('.')?;
  NaiveDate::parse_from_str(suffix, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
  }

  #[test]
  fn only_dated_client_logs_have_a_date() {
    assert_eq!(rolled_log_date("cif-client.log.2026-10-01"), Some(day("2026-10-01")));
    assert_eq!(rolled_log_date("cif-client.log"), None);
    assert_eq!(rolled_log_date("cif-client.log.old"), None);
    assert_eq!(rolled_log_date("other.log.2026-10-01"), None);
  }

  #[test]
  fn expired_logs_are_pruned() {
    let dir = tempfile::tempdir().unwrap();
    let old = dir.path().join("cif-client.log.2026-09-01");
    let recent = dir.path().join("cif-client.log.2026-10-15");
    let unrelated = dir.path().join("config.toml");
    for p in [&old, &recent, &unrelated] {
      fs::write(p, "x").unwrap();
    }

    let removed = prune_logs(dir.path(), 14, day("2026-10-19"));
    assert_eq!(removed, 1);
    assert!(!old.exists());
    assert!(recent.exists());
    assert!(unrelated.exists());
  }

  #[test]
  fn zero_retention_keeps_everything() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("cif-client.log.2000-01-01");
    fs::write(&log, "old").unwrap();

    assert_eq!(prune_logs(dir.path(), 0, day("2026-10-19")), 0);
    assert!(log.exists());
  }

  #[test]
  fn verbosity_picks_output() {
    assert_eq!(Output::for_verbosity(true), Output::FileAndStderr);
    assert_eq!(Output::for_verbosity(false), Output::FileOnly);
  }
}
