use crate::transport::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
  pub client: ClientConfig,
  pub retry: RetryConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
  #[serde(default = "default_remote")]
  pub remote: String,

  #[serde(default)]
  pub token: String,

  #[serde(default)]
  pub proxy: String,

  #[serde(default = "default_true")]
  pub verify_ssl: bool,

  #[serde(default)]
  pub verbose: bool,

  #[serde(default = "default_timeout_seconds")]
  pub timeout_seconds: u64,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      remote: default_remote(),
      token: String::new(),
      proxy: String::new(),
      verify_ssl: true,
      verbose: false,
      timeout_seconds: default_timeout_seconds(),
    }
  }
}

impl ClientConfig {
  pub fn proxy(&self) -> Option<String> {
    let p = self.proxy.trim();
    (!p.is_empty()).then(|| p.to_string())
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_seconds)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
  /// Total attempts per call while rate limited; 0 = unbounded.
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,

  /// 0 = unbounded.
  #[serde(default)]
  pub max_elapsed_seconds: u64,

  #[serde(default = "default_delay_seconds")]
  pub default_delay_seconds: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: default_max_attempts(),
      max_elapsed_seconds: 0,
      default_delay_seconds: default_delay_seconds(),
    }
  }
}

impl RetryConfig {
  pub fn policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
      max_elapsed: (self.max_elapsed_seconds > 0)
        .then(|| Duration::from_secs(self.max_elapsed_seconds)),
      default_delay: Duration::from_secs(self.default_delay_seconds),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_remote() -> String {
  "https://localhost".to_string()
}

fn default_timeout_seconds() -> u64 {
  300
}

fn default_max_attempts() -> u32 {
  crate::transport::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_delay_seconds() -> u64 {
  crate::transport::retry::DEFAULT_RETRY_DELAY.as_secs()
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
  #[serde(default)]
  pub client: Option<ClientConfig>,

  #[serde(default)]
  pub retry: Option<RetryConfig>,

  #[serde(default)]
  pub logging: Option<LoggingConfig>,
}

impl ConfigFile {
  fn normalize(self) -> Config {
    let mut cfg = Config::default();
    if let Some(c) = self.client {
      cfg.client = c;
    }
    if let Some(r) = self.retry {
      cfg.retry = r;
    }
    if let Some(l) = self.logging {
      cfg.logging = l;
    }

    if cfg.client.timeout_seconds == 0 {
      eprintln!("cif-client: client.timeout_seconds must be > 0; using the default.");
      cfg.client.timeout_seconds = default_timeout_seconds();
    }
    if let Some(reason) = validate_client_config(&cfg.client) {
      eprintln!("cif-client: {reason}; using the default remote.");
      cfg.client.remote = default_remote();
    }

    cfg
  }

  fn needs_upgrade(&self) -> bool {
    self.client.is_none() || self.retry.is_none() || self.logging.is_none()
  }
}

pub fn load_or_create_default(path: &Path) -> anyhow::Result<Config> {
  load_impl(path, true)
}

pub fn load_or_default_readonly(path: &Path) -> anyhow::Result<Config> {
  load_impl(path, false)
}

fn load_impl(path: &Path, allow_writes: bool) -> anyhow::Result<Config> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", path.display()))?;
  if allow_writes {
    fs::create_dir_all(parent)?;
  }

  if !path.exists() {
    let cfg = Config::default();
    if allow_writes {
      save(path, &cfg)?;
    }
    return Ok(cfg);
  }

  let raw = fs::read_to_string(path)?;
  match toml::from_str::<ConfigFile>(&raw) {
    Ok(file) => {
      let cfg = file.clone().normalize();
      if allow_writes && file.needs_upgrade() {
        let backup = parent.join(format!("config.toml.bak-{}", now_unix_s()));
        let _ = fs::copy(path, &backup);
        let _ = save(path, &cfg);
        eprintln!(
          "cif-client: upgraded config defaults written to {} (backup: {})",
          path.display(),
          backup.display()
        );
      }
      Ok(cfg)
    }
    Err(e) => {
      let cfg = Config::default();
      if allow_writes {
        let backup = parent.join(format!("config.toml.bad-{}", now_unix_s()));
        let _ = fs::rename(path, &backup);
        save(path, &cfg)?;
        eprintln!(
          "cif-client: invalid config at {} (backed up to {}): {e}",
          path.display(),
          backup.display()
        );
      } else {
        eprintln!(
          "cif-client: invalid config at {}; using defaults without writing: {e}",
          path.display()
        );
      }
      Ok(cfg)
    }
  }
}

pub fn save(path: &Path, cfg: &Config) -> anyhow::Result<()> {
  write_atomic(path, &toml::to_string_pretty(&to_config_file(cfg))?)
}

/// Updates one `section.key` value in place, checking the value's type.
pub fn set_value(cfg: &mut Config, key: &str, value: &str) -> anyhow::Result<()> {
  match key {
    "client.remote" => {
      let candidate = ClientConfig {
        remote: value.trim().to_string(),
        ..cfg.client.clone()
      };
      if let Some(reason) = validate_client_config(&candidate) {
        anyhow::bail!("{reason}");
      }
      cfg.client.remote = candidate.remote;
    }
    "client.token" => cfg.client.token = value.trim().to_string(),
    "client.proxy" => cfg.client.proxy = value.trim().to_string(),
    "client.verify_ssl" => cfg.client.verify_ssl = parse_bool(key, value)?,
    "client.verbose" => cfg.client.verbose = parse_bool(key, value)?,
    "client.timeout_seconds" => {
      let secs = parse_u64(key, value)?;
      if secs == 0 {
        anyhow::bail!("client.timeout_seconds must be > 0");
      }
      cfg.client.timeout_seconds = secs;
    }
    "retry.max_attempts" => {
      cfg.retry.max_attempts = u32::try_from(parse_u64(key, value)?)
        .map_err(|_| anyhow::anyhow!("retry.max_attempts is too large"))?;
    }
    "retry.max_elapsed_seconds" => cfg.retry.max_elapsed_seconds = parse_u64(key, value)?,
    "retry.default_delay_seconds" => cfg.retry.default_delay_seconds = parse_u64(key, value)?,
    "logging.level" => cfg.logging.level = value.trim().to_string(),
    "logging.retention_days" => cfg.logging.retention_days = parse_u64(key, value)?,
    _ => anyhow::bail!("unknown config key `{key}`"),
  }
  Ok(())
}

fn parse_bool(key: &str, value: &str) -> anyhow::Result<bool> {
  match value.trim().to_ascii_lowercase().as_str() {
    "true" | "1" | "yes" | "on" => Ok(true),
    "false" | "0" | "no" | "off" => Ok(false),
    _ => anyhow::bail!("expected `true` or `false` for `{key}`"),
  }
}

fn parse_u64(key: &str, value: &str) -> anyhow::Result<u64> {
  value
    .trim()
    .parse::<u64>()
    .map_err(|_| anyhow::anyhow!("expected a non-negative integer for `{key}`"))
}

fn to_config_file(cfg: &Config) -> ConfigFile {
  ConfigFile {
    client: Some(cfg.client.clone()),
    retry: Some(cfg.retry.clone()),
    logging: Some(cfg.logging.clone()),
  }
}

fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("file path has no parent: {}", path.display()))?;
  fs::create_dir_all(parent)?;
  let tmp = parent.join(format!(
    ".{}.tmp",
    path.file_name().unwrap_or_default().to_string_lossy()
  ));

  fs::write(&tmp, contents)?;
  fs::rename(&tmp, path)?;
  Ok(())
}

fn validate_client_config(cfg: &ClientConfig) -> Option<String> {
  if cfg.timeout_seconds == 0 {
    return Some("timeout_seconds must be > 0".to_string());
  }

  let remote = cfg.remote.trim();
  if remote.is_empty() {
    return None;
  }
  let Ok(url) = reqwest::Url::parse(remote) else {
    return Some(format!("invalid remote URL: {remote}"));
  };
  if url.scheme() != "https" && url.scheme() != "http" {
    return Some(format!("remote must use http or https: {remote}"));
  }
  if url.host_str().is_none() {
    return Some(format!("remote has no host: {remote}"));
  }

  None
}

fn now_unix_s() -> u64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}
