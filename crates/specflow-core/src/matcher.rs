//! Trigger matching.
//!
//! A trigger fires when the event type equals the trigger's type. `file_save`
//! triggers that carry a glob additionally require the saved path to match.

use crate::error::{Result, SpecflowError};
use crate::event::HookEvent;
use crate::paths;
use crate::rule::Trigger;
use glob::{MatchOptions, Pattern};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

pub fn compile_pattern(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern)
        .map_err(|e| SpecflowError::validation(format!("glob '{pattern}': {e}")))
}

/// Match a workspace-relative path against a compiled glob.
pub fn path_matches(pattern: &Pattern, path: &str) -> bool {
    pattern.matches_with(&paths::normalize(path), MATCH_OPTIONS)
}

/// Decide whether `trigger` fires for `event`.
///
/// `compiled` is the pre-compiled form of the trigger's pattern, if any. A
/// `file_save` trigger with a pattern never fires for an event without a path.
pub fn trigger_matches(trigger: &Trigger, compiled: Option<&Pattern>, event: &HookEvent) -> bool {
    if trigger.event_type() != event.event_type {
        return false;
    }
    match (trigger, compiled) {
        (Trigger::FileSave { pattern: Some(_) }, Some(glob)) => event
            .payload
            .file_path
            .as_deref()
            .map(|p| path_matches(glob, p))
            .unwrap_or(false),
        (Trigger::FileSave { pattern: Some(raw) }, None) => match compile_pattern(raw) {
            Ok(glob) => event
                .payload
                .file_path
                .as_deref()
                .map(|p| path_matches(&glob, p))
                .unwrap_or(false),
            Err(_) => false,
        },
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;

    fn ts_trigger() -> Trigger {
        Trigger::FileSave {
            pattern: Some("**/*.ts".to_string()),
        }
    }

    #[test]
    fn ts_pattern_gates_by_extension() {
        let trigger = ts_trigger();
        let glob = compile_pattern("**/*.ts").unwrap();
        assert!(trigger_matches(
            &trigger,
            Some(&glob),
            &HookEvent::file_save("src/a.ts")
        ));
        assert!(!trigger_matches(
            &trigger,
            Some(&glob),
            &HookEvent::file_save("src/a.js")
        ));
    }

    #[test]
    fn uncompiled_pattern_still_matches() {
        let trigger = ts_trigger();
        assert!(trigger_matches(
            &trigger,
            None,
            &HookEvent::file_save("src/deep/nested/b.ts")
        ));
    }

    #[test]
    fn pattern_without_path_never_matches() {
        let trigger = ts_trigger();
        let glob = compile_pattern("**/*.ts").unwrap();
        let event = HookEvent::bare(EventType::FileSave);
        assert!(!trigger_matches(&trigger, Some(&glob), &event));
    }

    #[test]
    fn file_save_without_pattern_matches_any_path() {
        let trigger = Trigger::FileSave { pattern: None };
        assert!(trigger_matches(
            &trigger,
            None,
            &HookEvent::file_save("README.md")
        ));
        assert!(trigger_matches(
            &trigger,
            None,
            &HookEvent::bare(EventType::FileSave)
        ));
    }

    #[test]
    fn event_type_must_match() {
        assert!(!trigger_matches(
            &Trigger::MessageSent,
            None,
            &HookEvent::file_save("src/a.ts")
        ));
        assert!(trigger_matches(
            &Trigger::MessageSent,
            None,
            &HookEvent::message_sent("hi")
        ));
        assert!(!trigger_matches(
            &ts_trigger(),
            None,
            &HookEvent::message_sent("src/a.ts")
        ));
    }

    #[test]
    fn single_star_stays_in_segment() {
        let glob = compile_pattern("src/*.rs").unwrap();
        assert!(path_matches(&glob, "src/main.rs"));
        assert!(path_matches(&glob, "./src/main.rs"));
        assert!(!path_matches(&glob, "src/bin/tool.rs"));
    }

    #[test]
    fn invalid_pattern_is_validation_error() {
        assert!(matches!(
            compile_pattern("a/[b"),
            Err(SpecflowError::Validation(_))
        ));
    }
}
