use crate::error::{Result, SpecflowError};
use crate::paths;
use crate::types::EventType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    FileSave {
        /// Glob matched against the saved file's workspace-relative path.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
    MessageSent,
    SessionCreated,
    AgentComplete,
    Manual,
}

impl Trigger {
    pub fn event_type(&self) -> EventType {
        match self {
            Trigger::FileSave { .. } => EventType::FileSave,
            Trigger::MessageSent => EventType::MessageSent,
            Trigger::SessionCreated => EventType::SessionCreated,
            Trigger::AgentComplete => EventType::AgentComplete,
            Trigger::Manual => EventType::Manual,
        }
    }

    pub fn pattern(&self) -> Option<&str> {
        match self {
            Trigger::FileSave { pattern } => pattern.as_deref(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    SendMessage {
        message: String,
    },
    ExecuteCommand {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<PathBuf>,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::SendMessage { .. } => "send_message",
            Action::ExecuteCommand { .. } => "execute_command",
        }
    }
}

// ---------------------------------------------------------------------------
// AutomationRule
// ---------------------------------------------------------------------------

/// A trigger → action binding. Persisted as one JSON document per rule,
/// named after `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutomationRule {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub trigger: Trigger,
    pub action: Action,
    /// Stamped by the engine on first registration. Rules loaded from disk
    /// are ordered by it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl AutomationRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        trigger: Trigger,
        action: Action,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            enabled: true,
            trigger,
            action,
            registered_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Check every required field and action payload. Runs before any engine
    /// state is touched.
    pub fn validate(&self) -> Result<()> {
        paths::validate_slug(&self.id)?;
        if self.name.trim().is_empty() {
            return Err(SpecflowError::validation(format!(
                "rule '{}': name must not be empty",
                self.id
            )));
        }
        if let Some(pattern) = self.trigger.pattern() {
            crate::matcher::compile_pattern(pattern)?;
        }
        match &self.action {
            Action::SendMessage { message } if message.trim().is_empty() => {
                Err(SpecflowError::validation(format!(
                    "rule '{}': send_message requires a non-empty message",
                    self.id
                )))
            }
            Action::ExecuteCommand { command, .. } if command.trim().is_empty() => {
                Err(SpecflowError::validation(format!(
                    "rule '{}': execute_command requires a non-empty command",
                    self.id
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate a persisted rule document.
    pub fn from_json(data: &str) -> Result<Self> {
        let rule: AutomationRule = serde_json::from_str(data)?;
        rule.validate()?;
        Ok(rule)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
