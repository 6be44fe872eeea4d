//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::loader::ConfigLoader;

/// Rejection categories recognised in configuration.
pub const REJECTION_CATEGORIES: [&str; 4] = ["style", "mechanics", "clarity", "scope"];

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub escalation: EscalationConfig,

    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub workflows: WorkflowsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn folio_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".folio"))
        .unwrap_or_else(|| PathBuf::from(".folio"))
}

/// Resolve `~` in a configured path.
fn resolve(path: &Path) -> PathBuf {
    PathBuf::from(ConfigLoader::expand_path(&path.to_string_lossy()))
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    folio_dir().join("folio.db")
}

impl DatabaseConfig {
    /// Database path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        resolve(&self.path)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Retry and escalation configuration.
///
/// `threshold` is shared by the runner's failure handling, the rejection
/// tracker and the escalation manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Retry count at which a category escalates.
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// Record an `escalated` event and log a warning when an escalation is created.
    #[serde(default = "default_true")]
    pub notify_human: bool,

    /// Target used when a category has no entry in `targets`.
    #[serde(default = "default_target")]
    pub default_target: String,

    /// Rejection category to escalation target.
    #[serde(default = "default_targets")]
    pub targets: HashMap<String, String>,

    /// Handler used when a category has no entry in `handlers`.
    #[serde(default = "default_handler")]
    pub default_handler: String,

    /// Rejection category to the agent that reworks a rejected step.
    #[serde(default = "default_handlers")]
    pub handlers: HashMap<String, String>,

    /// Per-category retry limits overriding `threshold`.
    #[serde(default)]
    pub max_retries: HashMap<String, u32>,
}

fn default_threshold() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_target() -> String {
    "human-reviewer".to_string()
}

fn default_targets() -> HashMap<String, String> {
    [
        ("style", "senior-editor"),
        ("mechanics", "human-reviewer"),
        ("clarity", "senior-editor"),
        ("scope", "human-reviewer"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_handler() -> String {
    "generic-handler".to_string()
}

fn default_handlers() -> HashMap<String, String> {
    [
        ("style", "style-editor"),
        ("mechanics", "mechanics-reviewer"),
        ("clarity", "clarity-editor"),
        ("scope", "scope-reviewer"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl EscalationConfig {
    /// Target for a category, falling back to the default target.
    pub fn target_for(&self, category: &str) -> &str {
        self.targets
            .get(category)
            .map(String::as_str)
            .unwrap_or(&self.default_target)
    }

    /// Handler for a category, falling back to the default handler.
    pub fn handler_for(&self, category: &str) -> &str {
        self.handlers
            .get(category)
            .map(String::as_str)
            .unwrap_or(&self.default_handler)
    }

    /// Retry limit for a category, falling back to `threshold`.
    pub fn threshold_for(&self, category: &str) -> u32 {
        self.max_retries
            .get(category)
            .copied()
            .unwrap_or(self.threshold)
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            notify_human: default_true(),
            default_target: default_target(),
            targets: default_targets(),
            default_handler: default_handler(),
            handlers: default_handlers(),
            max_retries: HashMap::new(),
        }
    }
}

/// Workflow runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Category recorded when a failed step report does not name one.
    #[serde(default = "default_rejection_category")]
    pub default_rejection_category: String,

    /// Upper bound on executor invocations per drive loop.
    #[serde(default = "default_max_auto_steps")]
    pub max_auto_steps: u32,
}

fn default_rejection_category() -> String {
    "mechanics".to_string()
}

fn default_max_auto_steps() -> u32 {
    50
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_rejection_category: default_rejection_category(),
            max_auto_steps: default_max_auto_steps(),
        }
    }
}

/// Shell step executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub working_dir: Option<String>,
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

impl ExecutorConfig {
    /// Working directory with `~` expanded.
    pub fn resolved_working_dir(&self) -> Option<PathBuf> {
        self.working_dir
            .as_deref()
            .map(|dir| PathBuf::from(ConfigLoader::expand_path(dir)))
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            timeout_secs: default_timeout_secs(),
            working_dir: None,
        }
    }
}

/// Workflow definition sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowsConfig {
    /// Directory of additional `*.toml` / `*.yaml` definitions.
    #[serde(default)]
    pub definitions_dir: Option<PathBuf>,
}

impl WorkflowsConfig {
    pub fn resolved_definitions_dir(&self) -> Option<PathBuf> {
        self.definitions_dir.as_deref().map(resolve)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set.
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for rotated log files.
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    folio_dir().join("logs")
}

impl LoggingConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        resolve(&self.dir)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: default_log_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.escalation.threshold, 3);
        assert!(config.escalation.notify_human);
        assert_eq!(config.executor.shell, "sh");
        assert!(config.workflows.definitions_dir.is_none());
        assert!(config.database.path.ends_with("folio.db"));
    }

    #[test]
    fn test_default_targets_cover_all_categories() {
        let escalation = EscalationConfig::default();
        for category in REJECTION_CATEGORIES {
            assert!(escalation.targets.contains_key(category));
        }
    }

    #[test]
    fn test_target_for() {
        let escalation = EscalationConfig::default();
        assert_eq!(escalation.target_for("style"), "senior-editor");
        assert_eq!(escalation.target_for("mechanics"), "human-reviewer");
    }

    #[test]
    fn test_target_for_falls_back_to_default() {
        let escalation = EscalationConfig {
            targets: HashMap::new(),
            default_target: "editor-in-chief".to_string(),
            ..Default::default()
        };
        assert_eq!(escalation.target_for("clarity"), "editor-in-chief");
    }

    #[test]
    fn test_handler_routing_defaults() {
        let escalation = EscalationConfig::default();
        for category in REJECTION_CATEGORIES {
            assert!(escalation.handlers.contains_key(category));
        }
        assert_eq!(escalation.handler_for("style"), "style-editor");
        assert_eq!(escalation.handler_for("typography"), "generic-handler");
    }

    #[test]
    fn test_threshold_for_uses_overrides() {
        let mut escalation = EscalationConfig::default();
        escalation.max_retries.insert("scope".to_string(), 1);
        assert_eq!(escalation.threshold_for("scope"), 1);
        assert_eq!(escalation.threshold_for("style"), 3);
    }

    #[test]
    fn test_resolved_paths_expand_tilde() {
        let database = DatabaseConfig {
            path: PathBuf::from("~/books/folio.db"),
        };
        assert!(!database.resolved_path().starts_with("~"));

        let executor = ExecutorConfig {
            working_dir: Some("~/books".to_string()),
            ..Default::default()
        };
        assert!(!executor.resolved_working_dir().unwrap().starts_with("~"));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("human-reviewer"));
        assert!(json.contains("mechanics"));
    }
}
