use crate::approval::FileEdit;
use crate::types::EventType;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Optional data accompanying an event. Fields feed trigger matching and
/// `send_message` placeholder substitution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<String>,
}

impl EventPayload {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// HookEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookEvent {
    pub event_type: EventType,
    #[serde(default)]
    pub payload: EventPayload,
}

impl HookEvent {
    pub fn new(event_type: EventType, payload: EventPayload) -> Self {
        Self {
            event_type,
            payload,
        }
    }

    pub fn bare(event_type: EventType) -> Self {
        Self::new(event_type, EventPayload::default())
    }

    pub fn file_save(path: impl Into<String>) -> Self {
        Self::new(EventType::FileSave, EventPayload::file(path))
    }

    pub fn message_sent(message: impl Into<String>) -> Self {
        Self::new(EventType::MessageSent, EventPayload::message(message))
    }
}

// ---------------------------------------------------------------------------
// WorkspaceEvent
// ---------------------------------------------------------------------------

/// An external event entering the workflow controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkspaceEvent {
    MessageSent {
        message: String,
    },
    FileSaved {
        path: String,
    },
    SessionCreated,
    AgentComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        spec: Option<String>,
        /// Edits the agent proposes; queued for approval, never applied here.
        #[serde(default)]
        edits: Vec<FileEdit>,
    },
}

impl WorkspaceEvent {
    pub fn to_hook_event(&self) -> HookEvent {
        match self {
            WorkspaceEvent::MessageSent { message } => HookEvent::message_sent(message.clone()),
            WorkspaceEvent::FileSaved { path } => HookEvent::file_save(path.clone()),
            WorkspaceEvent::SessionCreated => HookEvent::bare(EventType::SessionCreated),
            WorkspaceEvent::AgentComplete { spec, .. } => HookEvent::new(
                EventType::AgentComplete,
                EventPayload {
                    spec: spec.clone(),
                    ..EventPayload::default()
                },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_event_maps_to_hook_event() {
        let ev = WorkspaceEvent::FileSaved {
            path: "src/a.ts".to_string(),
        };
        let hook = ev.to_hook_event();
        assert_eq!(hook.event_type, EventType::FileSave);
        assert_eq!(hook.payload.file_path.as_deref(), Some("src/a.ts"));

        let ev = WorkspaceEvent::AgentComplete {
            spec: Some("checkout".to_string()),
            edits: Vec::new(),
        };
        let hook = ev.to_hook_event();
        assert_eq!(hook.event_type, EventType::AgentComplete);
        assert_eq!(hook.payload.spec.as_deref(), Some("checkout"));
    }

    #[test]
    fn workspace_event_json_tagged() {
        let json = r#"{"type":"message_sent","message":"hi"}"#;
        let ev: WorkspaceEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            ev,
            WorkspaceEvent::MessageSent {
                message: "hi".to_string()
            }
        );
    }
}
