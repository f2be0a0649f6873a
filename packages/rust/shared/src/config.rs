//! Application configuration for scholarflow.
//!
//! User config lives at `~/.scholarflow/scholarflow.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScholarflowError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "scholarflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".scholarflow";

// ---------------------------------------------------------------------------
// Config structs (matching scholarflow.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Optional subprocess generation bridge. Replaces the HTTP capability when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge: Option<BridgeConfig>,

    /// Pipeline behaviour.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Source collector settings for the report step.
    #[serde(default)]
    pub collector: CollectorConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory final documents are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Citation style handed to the formatting step.
    #[serde(default = "default_citation_style")]
    pub citation_style: String,

    /// Folder of `*.md` citation guides.
    #[serde(default = "default_citation_guides_dir")]
    pub citation_guides_dir: String,

    /// Number of parallel researchers. Unset means the per-workflow default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtopic_count: Option<usize>,

    /// Prior interactions a generation step sees as context.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Owner part of every identity key (`owner:role`).
    #[serde(default = "default_owner")]
    pub owner: String,

    /// libSQL database holding interaction history and run records.
    #[serde(default = "default_history_db")]
    pub history_db: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            citation_style: default_citation_style(),
            citation_guides_dir: default_citation_guides_dir(),
            subtopic_count: None,
            history_window: default_history_window(),
            owner: default_owner(),
            history_db: default_history_db(),
        }
    }
}

fn default_output_dir() -> String {
    "~/scholarflow-output".into()
}
fn default_citation_style() -> String {
    "american chemical society".into()
}
fn default_citation_guides_dir() -> String {
    "~/.scholarflow/citation_guides".into()
}
fn default_history_window() -> usize {
    3
}
fn default_owner() -> String {
    "user".into()
}
fn default_history_db() -> String {
    "~/.scholarflow/history.db".into()
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used by every generation step.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// API base URL (overridable for proxies and tests).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout.
    #[serde(default = "default_openrouter_timeout")]
    pub timeout_secs: u64,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_openrouter_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "openai/gpt-4o".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_openrouter_timeout() -> u64 {
    300
}

/// `[bridge]` section: a JSON-lines subprocess speaking the generation protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Interpreter or executable to spawn.
    #[serde(default = "default_bridge_command")]
    pub command: String,

    /// Script passed as the first argument.
    pub script: String,

    /// Working directory for the child process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

fn default_bridge_command() -> String {
    "python3".into()
}

/// What happens to a failed parallel member's slot in the final document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemberFailurePolicy {
    /// Render the missing-output warning in the member's body position.
    #[default]
    WarningBlock,
    /// Drop the slot from the document and only log it.
    LogOnly,
}

impl std::fmt::Display for MemberFailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WarningBlock => write!(f, "warning-block"),
            Self::LogOnly => write!(f, "log-only"),
        }
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub member_failure: MemberFailurePolicy,

    /// Run the structural validator over research fragments.
    #[serde(default = "default_true")]
    pub validate_outputs: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            member_failure: MemberFailurePolicy::default(),
            validate_outputs: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// `[collector]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Maximum concurrent source fetches.
    #[serde(default = "default_collector_concurrency")]
    pub concurrency: usize,

    /// Delay in ms each fetch task waits before issuing its request.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_ms: u64,

    /// Per-request timeout.
    #[serde(default = "default_collector_timeout")]
    pub timeout_secs: u64,

    /// HTML paragraphs shorter than this are dropped.
    #[serde(default = "default_min_paragraph_chars")]
    pub min_paragraph_chars: usize,

    /// Each source is truncated to this many characters in the report prompt.
    #[serde(default = "default_max_source_chars")]
    pub max_source_chars: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            concurrency: default_collector_concurrency(),
            rate_limit_ms: default_rate_limit(),
            timeout_secs: default_collector_timeout(),
            min_paragraph_chars: default_min_paragraph_chars(),
            max_source_chars: default_max_source_chars(),
        }
    }
}

fn default_collector_concurrency() -> usize {
    4
}
fn default_rate_limit() -> u64 {
    200
}
fn default_collector_timeout() -> u64 {
    10
}
fn default_min_paragraph_chars() -> usize {
    40
}
fn default_max_source_chars() -> usize {
    4000
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.scholarflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ScholarflowError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.scholarflow/scholarflow.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| ScholarflowError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ScholarflowError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ScholarflowError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ScholarflowError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ScholarflowError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the OpenRouter API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(ScholarflowError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}
