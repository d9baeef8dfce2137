use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Requirements,
    Design,
    Tasks,
    Implementation,
}

impl Phase {
    pub fn all() -> &'static [Phase] {
        &[
            Phase::Requirements,
            Phase::Design,
            Phase::Tasks,
            Phase::Implementation,
        ]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<Phase> {
        Phase::all().get(self.index() + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Requirements => "requirements",
            Phase::Design => "design",
            Phase::Tasks => "tasks",
            Phase::Implementation => "implementation",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = crate::error::SpecflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requirements" => Ok(Phase::Requirements),
            "design" => Ok(Phase::Design),
            "tasks" => Ok(Phase::Tasks),
            "implementation" => Ok(Phase::Implementation),
            _ => Err(crate::error::SpecflowError::InvalidPhase(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// Workspace event kinds a rule can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    FileSave,
    MessageSent,
    SessionCreated,
    AgentComplete,
    Manual,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::FileSave => "file_save",
            EventType::MessageSent => "message_sent",
            EventType::SessionCreated => "session_created",
            EventType::AgentComplete => "agent_complete",
            EventType::Manual => "manual",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = crate::error::SpecflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file_save" | "file-save" => Ok(EventType::FileSave),
            "message_sent" | "message-sent" => Ok(EventType::MessageSent),
            "session_created" | "session-created" => Ok(EventType::SessionCreated),
            "agent_complete" | "agent-complete" => Ok(EventType::AgentComplete),
            "manual" => Ok(EventType::Manual),
            _ => Err(crate::error::SpecflowError::InvalidEventType(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// The fixed set of watched configuration roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Specs,
    Hooks,
    Steering,
}

impl Category {
    pub fn all() -> &'static [Category] {
        &[Category::Specs, Category::Hooks, Category::Steering]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Specs => "specs",
            Category::Hooks => "hooks",
            Category::Steering => "steering",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = crate::error::SpecflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "specs" => Ok(Category::Specs),
            "hooks" => Ok(Category::Hooks),
            "steering" => Ok(Category::Steering),
            _ => Err(crate::error::SpecflowError::InvalidCategory(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ChangeKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
