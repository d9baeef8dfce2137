//! Routes configuration changes to the matching reloadable component.

use crate::types::Category;
use crate::store::Reloadable;
use crate::watcher::{ChangeHandler, ConfigChangeEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadFailure {
    pub category: Category,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReloadOutcome {
    Reloaded {
        category: Category,
        items: usize,
        duration_ms: u64,
    },
    /// Nothing is registered for the category.
    Skipped { category: Category },
    Failed(ReloadFailure),
}

impl ReloadOutcome {
    pub fn category(&self) -> Category {
        match self {
            ReloadOutcome::Reloaded { category, .. } | ReloadOutcome::Skipped { category } => {
                *category
            }
            ReloadOutcome::Failed(failure) => failure.category,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ReloadOutcome::Failed(_))
    }
}

/// One [`Reloadable`] per category. Cheap to clone.
#[derive(Clone, Default)]
pub struct ReloadCoordinator {
    targets: HashMap<Category, Arc<dyn Reloadable>>,
}

impl ReloadCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, category: Category, target: Arc<dyn Reloadable>) -> Self {
        self.targets.insert(category, target);
        self
    }

    pub async fn reload(&self, category: Category) -> ReloadOutcome {
        let Some(target) = self.targets.get(&category) else {
            tracing::debug!(%category, "no reload target registered");
            return ReloadOutcome::Skipped { category };
        };
        let start = Instant::now();
        match target.reload().await {
            Ok(items) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                tracing::info!(%category, items, duration_ms, "reloaded");
                ReloadOutcome::Reloaded {
                    category,
                    items,
                    duration_ms,
                }
            }
            Err(e) => {
                tracing::warn!(%category, error = %e, "reload failed");
                ReloadOutcome::Failed(ReloadFailure {
                    category,
                    message: e.to_string(),
                })
            }
        }
    }

    pub async fn reload_specs(&self) -> ReloadOutcome {
        self.reload(Category::Specs).await
    }

    pub async fn reload_hooks(&self) -> ReloadOutcome {
        self.reload(Category::Hooks).await
    }

    pub async fn reload_steering(&self) -> ReloadOutcome {
        self.reload(Category::Steering).await
    }

    /// Reload every category concurrently. One failure never prevents the
    /// others.
    pub async fn reload_all(&self) -> Vec<ReloadOutcome> {
        futures::future::join_all(Category::all().iter().map(|c| self.reload(*c))).await
    }
}

#[async_trait]
impl ChangeHandler for ReloadCoordinator {
    async fn handle(&self, event: &ConfigChangeEvent) -> anyhow::Result<()> {
        match self.reload(event.category).await {
            ReloadOutcome::Failed(failure) => Err(anyhow::anyhow!(
                "reload of {} after change to {} failed: {}",
                failure.category,
                event.event.path.display(),
                failure.message
            )),
            _ => Ok(()),
        }
    }
}
