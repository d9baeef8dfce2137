use crate::error::{Result, SpecflowError};
use crate::types::Category;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const SPECFLOW_DIR: &str = ".specflow";
pub const SPECS_DIR: &str = ".specflow/specs";
pub const HOOKS_DIR: &str = ".specflow/hooks";
pub const STEERING_DIR: &str = ".specflow/steering";

pub const CONFIG_FILE: &str = ".specflow/config.yaml";

pub const HOOK_EXTENSION: &str = "json";
pub const DOCUMENT_EXTENSION: &str = "md";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn category_dir(root: &Path, category: Category) -> PathBuf {
    match category {
        Category::Specs => root.join(SPECS_DIR),
        Category::Hooks => root.join(HOOKS_DIR),
        Category::Steering => root.join(STEERING_DIR),
    }
}

pub fn category_extension(category: Category) -> &'static str {
    match category {
        Category::Hooks => HOOK_EXTENSION,
        Category::Specs | Category::Steering => DOCUMENT_EXTENSION,
    }
}

/// Normalize a workspace-relative path for matching: forward slashes, no
/// leading `./`.
pub fn normalize(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut s = unified.as_str();
    while let Some(rest) = s.strip_prefix("./") {
        s = rest;
    }
    s.to_string()
}

/// Resolve a workspace-relative path, rejecting absolute paths and any path
/// that climbs out of `root`.
pub fn resolve_within(root: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    if relative.trim().is_empty() {
        return Err(SpecflowError::validation("path: must not be empty"));
    }
    for component in rel.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(SpecflowError::validation(format!(
                    "path '{relative}': must be relative and stay inside the workspace"
                )))
            }
        }
    }
    Ok(root.join(rel))
}

// ---------------------------------------------------------------------------
// Slug validation
// ---------------------------------------------------------------------------

static SLUG_RE: OnceLock<Regex> = OnceLock::new();

fn slug_re() -> &'static Regex {
    SLUG_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").expect("slug regex is valid")
    })
}

pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty() && slug.len() <= 64 && slug_re().is_match(slug)
}

pub fn validate_slug(slug: &str) -> Result<()> {
    if !is_valid_slug(slug) {
        return Err(SpecflowError::validation(format!(
            "id '{slug}': must be lowercase alphanumeric with hyphens"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_slugs() {
        for slug in ["lint-on-save", "a", "format-123", "x1"] {
            validate_slug(slug).unwrap_or_else(|_| panic!("expected valid: {slug}"));
        }
    }

    #[test]
    fn invalid_slugs() {
        for slug in [
            "",
            "-starts-with-dash",
            "ends-with-dash-",
            "has spaces",
            "UPPER",
            "a_b",
            "../escape",
        ] {
            assert!(validate_slug(slug).is_err(), "expected invalid: {slug}");
        }
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/proj/.specflow/config.yaml")
        );
        assert_eq!(
            category_dir(root, Category::Hooks),
            PathBuf::from("/tmp/proj/.specflow/hooks")
        );
        assert_eq!(category_extension(Category::Steering), "md");
    }

    #[test]
    fn normalize_strips_dot_prefix_and_backslashes() {
        assert_eq!(normalize("./src/a.ts"), "src/a.ts");
        assert_eq!(normalize("src\\lib\\b.rs"), "src/lib/b.rs");
        assert_eq!(normalize("src/a.ts"), "src/a.ts");
    }

    #[test]
    fn resolve_within_rejects_escape() {
        let root = Path::new("/tmp/proj");
        assert!(resolve_within(root, "src/main.rs").is_ok());
        assert!(resolve_within(root, "../etc/passwd").is_err());
        assert!(resolve_within(root, "/etc/passwd").is_err());
        assert!(resolve_within(root, "  ").is_err());
    }
}
