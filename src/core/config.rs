use std::fs;
use std::path::{Path, PathBuf};
use serde::Deserialize;
use crate::core::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub home_dir: PathBuf,
    pub storage_line_limit: usize,   // Lines per record file
    pub record_cache_size: usize,    // Bodies cached per collection, 0 disables
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            home_dir: PathBuf::from("./data"),
            storage_line_limit: 1000,
            record_cache_size: 0,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Config rooted at `home_dir` with every other field defaulted.
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        Config {
            home_dir: home_dir.into(),
            ..Config::default()
        }
    }

    /// Read a JSON config file. Missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        let mut config: Config = serde_json::from_slice(&data)?;
        config.home_dir = expand_home(&config.home_dir);
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `SLOTDB_*` variables. `lookup` is normally
    /// `|key| std::env::var(key).ok()`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("SLOTDB_HOME_DIR") {
            self.home_dir = expand_home(Path::new(&dir));
        }
        if let Some(limit) = lookup("SLOTDB_STORAGE_LINE_LIMIT") {
            self.storage_line_limit = limit.parse()
                .map_err(|_| Error::invalid(format!("SLOTDB_STORAGE_LINE_LIMIT is not a number: {}", limit)))?;
        }
        if let Some(size) = lookup("SLOTDB_RECORD_CACHE_SIZE") {
            self.record_cache_size = size.parse()
                .map_err(|_| Error::invalid(format!("SLOTDB_RECORD_CACHE_SIZE is not a number: {}", size)))?;
        }
        if let Some(level) = lookup("SLOTDB_LOG_LEVEL") {
            self.log_level = level;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage_line_limit == 0 {
            return Err(Error::invalid("storage-line-limit must be at least 1"));
        }
        Ok(())
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let Some(home) = std::env::var_os("HOME") else {
        return path.to_path_buf();
    };
    match path.strip_prefix("~") {
        Ok(rest) => PathBuf::from(home).join(rest),
        Err(_) => path.to_path_buf(),
    }
}
