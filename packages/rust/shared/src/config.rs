//! Application configuration for Prospector.
//!
//! User config lives at `~/.prospector/prospector.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ProspectorError, Result};
use crate::types::{JobSettings, ResumePolicy};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "prospector.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".prospector";

// ---------------------------------------------------------------------------
// Config structs (matching prospector.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Job defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Research engine settings.
    #[serde(default)]
    pub research: ResearchConfig,

    /// Worker registry settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Seconds to wait between research calls.
    #[serde(default = "default_delay")]
    pub delay_between_searches_secs: u64,

    /// Organizations requested per sub-region.
    #[serde(default = "default_max_results")]
    pub max_results_per_sub_region: u32,

    /// `revisit_all` or `remaining_only`.
    #[serde(default)]
    pub resume_policy: ResumePolicy,

    /// Database file; `~` expands to the home directory.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            delay_between_searches_secs: default_delay(),
            max_results_per_sub_region: default_max_results(),
            resume_policy: ResumePolicy::default(),
            database_path: default_database_path(),
        }
    }
}

fn default_delay() -> u64 {
    5
}
fn default_max_results() -> u32 {
    10
}
fn default_database_path() -> String {
    "~/.prospector/prospector.db".into()
}

/// `[research]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of an OpenAI-compatible chat completions API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-call timeout. Multi-step reasoning is slow; keep this generous.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "GROK_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.x.ai/v1".into()
}
fn default_model() -> String {
    "grok-4".into()
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_timeout() -> u64 {
    120
}

/// `[orchestrator]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of jobs with a live worker.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Drop an in-flight research call when its job is paused or stopped.
    #[serde(default = "default_true")]
    pub cancel_in_flight: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            cancel_in_flight: true,
        }
    }
}

fn default_max_workers() -> usize {
    8
}
fn default_true() -> bool {
    true
}

impl From<&AppConfig> for JobSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            delay_between_searches: Duration::from_secs(config.defaults.delay_between_searches_secs),
            max_results_per_sub_region: config.defaults.max_results_per_sub_region,
            resume_policy: config.defaults.resume_policy,
        }
    }
}

impl AppConfig {
    /// Resolve the database path, expanding a leading `~`.
    pub fn database_path(&self) -> Result<PathBuf> {
        expand_home(&self.defaults.database_path)
    }
}

fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| ProspectorError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.prospector/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ProspectorError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.prospector/prospector.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ProspectorError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        ProspectorError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Reject values that would make the orchestrator misbehave.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.orchestrator.max_workers == 0 {
        return Err(ProspectorError::config("orchestrator.max_workers must be at least 1"));
    }
    if config.defaults.max_results_per_sub_region == 0 {
        return Err(ProspectorError::config(
            "defaults.max_results_per_sub_region must be at least 1",
        ));
    }
    Url::parse(&config.research.base_url).map_err(|e| {
        ProspectorError::config(format!("invalid research.base_url '{}': {e}", config.research.base_url))
    })?;
    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ProspectorError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ProspectorError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ProspectorError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the research API key from the configured env var.
pub fn research_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.research.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(ProspectorError::config(format!(
            "research API key not found. Set the {var_name} environment variable."
        ))),
    }
}
