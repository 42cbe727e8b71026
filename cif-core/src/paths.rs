use std::path::{Path, PathBuf};

pub fn base_dir() -> anyhow::Result<PathBuf> {
  if let Some(dir) = std::env::var_os("CIF_HOME").filter(|v| !v.is_empty()) {
    return Ok(PathBuf::from(dir));
  }
  let home = dirs::home_dir()
    .ok_or_else(|| anyhow::anyhow!("cannot determine home directory; set CIF_HOME"))?;
  Ok(home.join(".cif"))
}

pub fn config_path(base: &Path) -> PathBuf {
  base.join("config.toml")
}

pub fn logs_dir(base: &Path) -> PathBuf {
  base.join("logs")
}
