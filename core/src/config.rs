use crate::hash::DigestAlgorithm;
use crate::normalize::NormalizerOptions;
use crate::reconcile::{ReconcileOptions, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_DETAILED_MISMATCHES};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV_VAR: &str = "TABRECON_CONFIG";
pub const LOCAL_CONFIG_FILE: &str = "tabrecon.toml";
const GLOBAL_CONFIG_DIR: &str = ".tabrecon";
const GLOBAL_CONFIG_FILE: &str = "global.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub normalize: NormalizerOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub max_detailed_mismatches: usize,
    pub digest_algorithm: DigestAlgorithm,
    pub chunk_size: usize,
    pub parallel: bool,
    pub min_significance: u8,
    pub max_rows_per_side: Option<usize>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_detailed_mismatches: DEFAULT_MAX_DETAILED_MISMATCHES,
            digest_algorithm: DigestAlgorithm::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            parallel: true,
            min_significance: crate::diff::DEFAULT_MIN_SIGNIFICANCE,
            max_rows_per_side: None,
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse tabrecon configuration")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Runtime options for a reconciliation run
    pub fn to_options(&self) -> ReconcileOptions {
        let r = &self.reconcile;
        ReconcileOptions {
            max_detailed_mismatches: r.max_detailed_mismatches,
            digest_algorithm: r.digest_algorithm,
            chunk_size: r.chunk_size,
            parallel: r.parallel,
            min_significance: r.min_significance,
            max_rows_per_side: r.max_rows_per_side,
            normalizer: self.normalize,
            ..ReconcileOptions::default()
        }
    }

    /// Runtime options, validated
    pub fn load_options(&self) -> crate::error::Result<ReconcileOptions> {
        let options = self.to_options();
        options
            .validate()
            .map_err(|e| crate::error::ReconError::configuration(e.to_string()))?;
        Ok(options)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply `TABRECON_*` overrides from `lookup`; unparseable values are logged and ignored
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("TABRECON_MAX_DETAILED_MISMATCHES") {
            match value.trim().parse() {
                Ok(max) => self.reconcile.max_detailed_mismatches = max,
                Err(_) => log::warn!("Ignoring invalid TABRECON_MAX_DETAILED_MISMATCHES: {value}"),
            }
        }
        if let Some(value) = lookup("TABRECON_DIGEST") {
            match value.parse() {
                Ok(algorithm) => self.reconcile.digest_algorithm = algorithm,
                Err(e) => log::warn!("Ignoring TABRECON_DIGEST: {e}"),
            }
        }
        if let Some(value) = lookup("TABRECON_CHUNK_SIZE") {
            match value.trim().parse::<usize>() {
                Ok(size) if size > 0 => self.reconcile.chunk_size = size,
                _ => log::warn!("Ignoring invalid TABRECON_CHUNK_SIZE: {value}"),
            }
        }
    }
}

pub fn global_config_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(GLOBAL_CONFIG_DIR))
        .unwrap_or_else(|| PathBuf::from(GLOBAL_CONFIG_DIR))
        .join(GLOBAL_CONFIG_FILE)
}

fn read_if_valid(path: &Path) -> Option<Config> {
    if !path.exists() {
        return None;
    }
    match Config::from_file(path) {
        Ok(config) => Some(config),
        Err(e) => {
            log::warn!("Skipping config file {}: {e:#}", path.display());
            None
        }
    }
}

pub fn get_config() -> Result<Config> {
    let current_dir = env::current_dir()?;
    get_config_in(&current_dir)
}

/// Resolve configuration using `dir` as the location of the local config file
///
/// Priority order (highest to lowest):
/// 1. File named by `TABRECON_CONFIG`
/// 2. Local `tabrecon.toml` in `dir`
/// 3. Global `~/.tabrecon/global.toml`
/// 4. Defaults
///
/// Environment overrides are applied on top of whichever file won.
pub fn get_config_in(dir: &Path) -> Result<Config> {
    let mut config = None;

    if let Ok(config_path) = env::var(CONFIG_ENV_VAR) {
        config = read_if_valid(Path::new(&config_path));
    }

    if config.is_none() {
        config = read_if_valid(&dir.join(LOCAL_CONFIG_FILE));
    }

    if config.is_none() {
        config = read_if_valid(&global_config_path());
    }

    let mut config = config.unwrap_or_default();
    config.apply_env_overrides();
    Ok(config)
}

pub fn save_config(config: &Config) -> Result<()> {
    save_config_to(config, &global_config_path())
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let config_toml = toml::to_string_pretty(config)?;
    fs::write(path, config_toml)?;
    Ok(())
}
