use crate::error::Result;
use crate::paths;
use crate::types::Category;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// WatchConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Optional glob per category, relative to the category root. Changes to
    /// paths that do not match are dropped before debouncing.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub patterns: HashMap<Category, String>,
}

fn default_debounce_ms() -> u64 {
    300
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            patterns: HashMap::new(),
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn pattern_for(&self, category: Category) -> Option<&str> {
        self.patterns.get(&category).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// HooksConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(default = "default_timeout")]
    pub command_timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    60
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            command_timeout_seconds: default_timeout(),
        }
    }
}

impl HooksConfig {
    /// `0` disables the timeout.
    pub fn command_timeout(&self) -> Option<Duration> {
        if self.command_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.command_timeout_seconds))
        }
    }
}

// ---------------------------------------------------------------------------
// AgentConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Shell command that receives `send_message` text on stdin, e.g. `claude -p`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            watch: WatchConfig::default(),
            hooks: HooksConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl Config {
    /// Load `.specflow/config.yaml`, falling back to defaults when absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.watch.debounce_ms == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "watch.debounce_ms is 0: every raw change triggers a reload".to_string(),
            });
        } else if self.watch.debounce_ms > 10_000 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "watch.debounce_ms={} (>10s delays every reload)",
                    self.watch.debounce_ms
                ),
            });
        }

        for (category, pattern) in &self.watch.patterns {
            if let Err(e) = glob::Pattern::new(pattern) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("watch.patterns.{category}: invalid glob '{pattern}': {e}"),
                });
            }
        }

        if self.hooks.command_timeout_seconds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "hooks.command_timeout_seconds is 0: commands may run forever"
                    .to_string(),
            });
        }

        if let Some(cmd) = &self.agent.command {
            if cmd.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: "agent.command is empty: send_message hooks will fail".to_string(),
                });
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.watch.debounce_ms, 300);
        assert_eq!(parsed.hooks.command_timeout_seconds, 60);
        assert!(parsed.agent.command.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.watch.debounce(), Duration::from_millis(300));
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".specflow")).unwrap();
        std::fs::write(
            dir.path().join(".specflow/config.yaml"),
            "watch:\n  debounce_ms: 50\n  patterns:\n    steering: \"*.md\"\n",
        )
        .unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.watch.debounce_ms, 50);
        assert_eq!(cfg.watch.pattern_for(Category::Steering), Some("*.md"));
        assert_eq!(cfg.watch.pattern_for(Category::Specs), None);
        assert_eq!(cfg.hooks.command_timeout_seconds, 60);
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.agent.command = Some("claude -p".to_string());
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.agent.command.as_deref(), Some("claude -p"));
    }

    #[test]
    fn zero_timeout_disables_timeout() {
        let hooks = HooksConfig {
            command_timeout_seconds: 0,
        };
        assert!(hooks.command_timeout().is_none());
    }

    #[test]
    fn validate_flags_bad_glob_and_zero_debounce() {
        let mut cfg = Config::default();
        cfg.watch.debounce_ms = 0;
        cfg.watch
            .patterns
            .insert(Category::Hooks, "[unclosed".to_string());
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.message.contains("debounce_ms")));
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("invalid glob")));
    }

    #[test]
    fn default_config_has_no_warnings() {
        assert!(Config::default().validate().is_empty());
    }
}
