//! Debounced change detection over the workspace configuration roots.
//!
//! Raw notifications from a [`WatchPrimitive`] are classified by the root they
//! arrived on, filtered by the root's optional glob, and debounced per
//! `(category, path)`. Each quiet window ends with exactly one
//! [`ConfigChangeEvent`] delivered to every registered [`ChangeHandler`].

use crate::error::{Result, SpecflowError};
use crate::matcher;
use crate::registry::{Registry, Subscription};
use crate::types::{Category, ChangeKind};
use async_trait::async_trait;
use glob::Pattern;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Watch primitive
// ---------------------------------------------------------------------------

/// Raw change callback. May be invoked from any thread.
pub type RawCallback = Arc<dyn Fn(PathBuf, ChangeKind) + Send + Sync>;

pub trait WatchHandle: Send {
    fn dispose(self: Box<Self>);
}

/// Low-level recursive directory subscription.
pub trait WatchPrimitive: Send + Sync {
    fn watch(&self, root: &Path, callback: RawCallback) -> Result<Box<dyn WatchHandle>>;
}

/// [`WatchPrimitive`] backed by the platform watcher from `notify`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyWatchPrimitive;

struct NotifyHandle {
    _watcher: notify::RecommendedWatcher,
}

impl WatchHandle for NotifyHandle {
    fn dispose(self: Box<Self>) {}
}

fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeKind::Created),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        _ => None,
    }
}

impl WatchPrimitive for NotifyWatchPrimitive {
    fn watch(&self, root: &Path, callback: RawCallback) -> Result<Box<dyn WatchHandle>> {
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if let Some(kind) = classify(&event.kind) {
                        for path in event.paths {
                            callback(path, kind);
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "watch error"),
            })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        Ok(Box::new(NotifyHandle { _watcher: watcher }))
    }
}

// ---------------------------------------------------------------------------
// Events and handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchRoot {
    pub category: Category,
    pub path: PathBuf,
    /// Glob relative to `path`; non-matching changes are dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl WatchRoot {
    pub fn new(category: Category, path: impl Into<PathBuf>) -> Self {
        Self {
            category,
            path: path.into(),
            pattern: None,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub category: Category,
    pub path: PathBuf,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChangeEvent {
    pub category: Category,
    pub event: ChangeEvent,
}

#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn handle(&self, event: &ConfigChangeEvent) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> ChangeHandler for F
where
    F: Fn(&ConfigChangeEvent) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle(&self, event: &ConfigChangeEvent) -> anyhow::Result<()> {
        self(event)
    }
}

// ---------------------------------------------------------------------------
// ChangeWatcher
// ---------------------------------------------------------------------------

type Key = (Category, PathBuf);

struct Pending {
    generation: u64,
    kind: ChangeKind,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    watching: bool,
    runtime: Option<Handle>,
    handles: Vec<Box<dyn WatchHandle>>,
    pending: HashMap<Key, Pending>,
    generation: u64,
}

struct Shared {
    roots: Vec<WatchRoot>,
    debounce: Duration,
    primitive: Arc<dyn WatchPrimitive>,
    handlers: Registry<Arc<dyn ChangeHandler>>,
    state: Mutex<State>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(shared: &Arc<Self>, category: Category, path: PathBuf, kind: ChangeKind) {
        let mut state = shared.state();
        if !state.watching {
            return;
        }
        let Some(runtime) = state.runtime.clone() else {
            return;
        };
        state.generation += 1;
        let generation = state.generation;
        let key = (category, path);

        if let Some(previous) = state.pending.remove(&key) {
            previous.task.abort();
        }

        let weak: Weak<Shared> = Arc::downgrade(shared);
        let delay = shared.debounce;
        let task_key = key.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.fire(task_key, generation).await;
            }
        });
        tracing::debug!(category = %key.0, path = %key.1.display(), %kind, "change debounced");
        state.pending.insert(
            key,
            Pending {
                generation,
                kind,
                task,
            },
        );
    }

    async fn fire(&self, key: Key, generation: u64) {
        let kind = {
            let mut state = self.state();
            if !state.watching {
                return;
            }
            match state.pending.get(&key) {
                Some(p) if p.generation == generation => {}
                _ => return,
            }
            match state.pending.remove(&key) {
                Some(p) => p.kind,
                None => return,
            }
        };

        let (category, path) = key;
        let event = ConfigChangeEvent {
            category,
            event: ChangeEvent {
                category,
                path,
                kind,
            },
        };
        tracing::debug!(
            category = %category,
            path = %event.event.path.display(),
            %kind,
            "config change"
        );
        for handler in self.handlers.snapshot() {
            if let Err(e) = handler.handle(&event).await {
                tracing::warn!(
                    category = %category,
                    path = %event.event.path.display(),
                    error = %e,
                    "change handler failed"
                );
            }
        }
    }
}

/// Filter closure input: the changed path relative to its root.
fn passes_filter(root: &Path, pattern: Option<&Pattern>, path: &Path) -> bool {
    let Some(pattern) = pattern else {
        return true;
    };
    let rel = path.strip_prefix(root).unwrap_or(path);
    matcher::path_matches(pattern, &rel.to_string_lossy())
}

pub struct ChangeWatcher {
    shared: Arc<Shared>,
}

impl ChangeWatcher {
    pub fn new(
        roots: Vec<WatchRoot>,
        debounce: Duration,
        primitive: Arc<dyn WatchPrimitive>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                roots,
                debounce,
                primitive,
                handlers: Registry::new(),
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn roots(&self) -> &[WatchRoot] {
        &self.shared.roots
    }

    pub fn debounce(&self) -> Duration {
        self.shared.debounce
    }

    pub fn is_watching(&self) -> bool {
        self.shared.state().watching
    }

    /// Number of debounce windows currently open.
    pub fn pending(&self) -> usize {
        self.shared.state().pending.len()
    }

    /// Subscribe every root. Must be called from within a tokio runtime;
    /// calling it while already watching does nothing.
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|e| {
            SpecflowError::Execution(format!("change watcher needs a tokio runtime: {e}"))
        })?;
        {
            let mut state = self.shared.state();
            if state.watching {
                return Ok(());
            }
            state.watching = true;
            state.runtime = Some(runtime);
        }

        let mut handles = Vec::with_capacity(self.shared.roots.len());
        for root in &self.shared.roots {
            let pattern = match root.pattern.as_deref().map(matcher::compile_pattern).transpose() {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(
                        category = %root.category,
                        error = %e,
                        "invalid watch pattern, root skipped"
                    );
                    continue;
                }
            };
            let weak = Arc::downgrade(&self.shared);
            let category = root.category;
            let base = root.path.clone();
            let callback: RawCallback = Arc::new(move |path: PathBuf, kind: ChangeKind| {
                if !passes_filter(&base, pattern.as_ref(), &path) {
                    return;
                }
                if let Some(shared) = weak.upgrade() {
                    Shared::record(&shared, category, path, kind);
                }
            });
            match self.shared.primitive.watch(&root.path, callback) {
                Ok(handle) => handles.push(handle),
                Err(e) => tracing::warn!(
                    category = %root.category,
                    path = %root.path.display(),
                    error = %e,
                    "failed to watch root, skipped"
                ),
            }
        }

        let mut state = self.shared.state();
        if !state.watching {
            // stop() ran while subscribing
            drop(state);
            handles.into_iter().for_each(|h| h.dispose());
            return Ok(());
        }
        let watched = handles.len();
        state.handles.extend(handles);
        drop(state);
        tracing::info!(
            roots = watched,
            debounce_ms = self.shared.debounce.as_millis() as u64,
            "change watcher started"
        );
        Ok(())
    }

    /// Dispose subscriptions and cancel pending windows. Idempotent.
    pub fn stop(&self) {
        let handles = {
            let mut state = self.shared.state();
            if !state.watching {
                return;
            }
            state.watching = false;
            state.runtime = None;
            for (_, pending) in state.pending.drain() {
                pending.task.abort();
            }
            std::mem::take(&mut state.handles)
        };
        handles.into_iter().for_each(|h| h.dispose());
        tracing::info!("change watcher stopped");
    }

    pub fn on_change<H>(&self, handler: H) -> Subscription
    where
        H: ChangeHandler + 'static,
    {
        self.shared.handlers.add(Arc::new(handler))
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DEBOUNCE: Duration = Duration::from_millis(30);
    const SETTLE: Duration = Duration::from_millis(250);

    /// Keeps callbacks by root so tests can inject raw events.
    #[derive(Default)]
    struct FakePrimitive {
        callbacks: Mutex<Vec<(PathBuf, RawCallback)>>,
        fail_for: Option<PathBuf>,
        subscribed: AtomicUsize,
    }

    struct FakeHandle;

    impl WatchHandle for FakeHandle {
        fn dispose(self: Box<Self>) {}
    }

    impl WatchPrimitive for FakePrimitive {
        fn watch(&self, root: &Path, callback: RawCallback) -> Result<Box<dyn WatchHandle>> {
            if self.fail_for.as_deref() == Some(root) {
                return Err(SpecflowError::Execution("no such dir".to_string()));
            }
            self.subscribed.fetch_add(1, Ordering::SeqCst);
            self.callbacks
                .lock()
                .unwrap()
                .push((root.to_path_buf(), callback));
            Ok(Box::new(FakeHandle))
        }
    }

    impl FakePrimitive {
        fn emit(&self, root: &str, file: &str, kind: ChangeKind) {
            let callbacks = self.callbacks.lock().unwrap().clone();
            for (path, cb) in callbacks {
                if path.as_path() == Path::new(root) {
                    cb(path.join(file), kind);
                }
            }
        }
    }

    fn roots() -> Vec<WatchRoot> {
        vec![
            WatchRoot::new(Category::Specs, "/ws/specs"),
            WatchRoot::new(Category::Hooks, "/ws/hooks").with_pattern("*.json"),
            WatchRoot::new(Category::Steering, "/ws/steering"),
        ]
    }

    fn collecting(watcher: &ChangeWatcher) -> Arc<Mutex<Vec<ConfigChangeEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        watcher.on_change(move |event: &ConfigChangeEvent| -> anyhow::Result<()> {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });
        seen
    }

    #[tokio::test]
    async fn burst_coalesces_to_one_event_with_last_kind() {
        let primitive = Arc::new(FakePrimitive::default());
        let watcher = ChangeWatcher::new(roots(), DEBOUNCE, primitive.clone());
        let seen = collecting(&watcher);
        watcher.start().unwrap();

        primitive.emit("/ws/specs", "a.md", ChangeKind::Created);
        primitive.emit("/ws/specs", "a.md", ChangeKind::Modified);
        primitive.emit("/ws/specs", "a.md", ChangeKind::Modified);
        assert_eq!(watcher.pending(), 1);
        tokio::time::sleep(SETTLE).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].category, Category::Specs);
        assert_eq!(seen[0].event.path, PathBuf::from("/ws/specs/a.md"));
        assert_eq!(seen[0].event.kind, ChangeKind::Modified);
        assert_eq!(watcher.pending(), 0);
    }

    #[tokio::test]
    async fn distinct_paths_debounce_independently() {
        let primitive = Arc::new(FakePrimitive::default());
        let watcher = ChangeWatcher::new(roots(), DEBOUNCE, primitive.clone());
        let seen = collecting(&watcher);
        watcher.start().unwrap();

        primitive.emit("/ws/specs", "a.md", ChangeKind::Modified);
        primitive.emit("/ws/steering", "a.md", ChangeKind::Modified);
        primitive.emit("/ws/specs", "b.md", ChangeKind::Deleted);
        tokio::time::sleep(SETTLE).await;

        let mut categories: Vec<_> = seen.lock().unwrap().iter().map(|e| e.category).collect();
        categories.sort();
        assert_eq!(
            categories,
            [Category::Specs, Category::Specs, Category::Steering]
        );
    }

    #[tokio::test]
    async fn stop_cancels_pending_windows() {
        let primitive = Arc::new(FakePrimitive::default());
        let watcher = ChangeWatcher::new(roots(), DEBOUNCE, primitive.clone());
        let seen = collecting(&watcher);
        watcher.start().unwrap();

        primitive.emit("/ws/specs", "a.md", ChangeKind::Modified);
        watcher.stop();
        watcher.stop();
        primitive.emit("/ws/specs", "b.md", ChangeKind::Modified);
        tokio::time::sleep(SETTLE).await;

        assert!(seen.lock().unwrap().is_empty());
        assert!(!watcher.is_watching());
    }

    #[tokio::test]
    async fn start_is_idempotent_and_restartable() {
        let primitive = Arc::new(FakePrimitive::default());
        let watcher = ChangeWatcher::new(roots(), DEBOUNCE, primitive.clone());
        watcher.start().unwrap();
        watcher.start().unwrap();
        assert_eq!(primitive.subscribed.load(Ordering::SeqCst), 3);

        watcher.stop();
        watcher.start().unwrap();
        assert_eq!(primitive.subscribed.load(Ordering::SeqCst), 6);
        assert!(watcher.is_watching());
    }

    #[tokio::test]
    async fn failing_root_is_skipped() {
        let primitive = Arc::new(FakePrimitive {
            fail_for: Some(PathBuf::from("/ws/specs")),
            ..FakePrimitive::default()
        });
        let watcher = ChangeWatcher::new(roots(), DEBOUNCE, primitive.clone());
        let seen = collecting(&watcher);
        watcher.start().unwrap();
        assert_eq!(primitive.subscribed.load(Ordering::SeqCst), 2);

        primitive.emit("/ws/steering", "tech.md", ChangeKind::Modified);
        tokio::time::sleep(SETTLE).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn root_pattern_filters_noise() {
        let primitive = Arc::new(FakePrimitive::default());
        let watcher = ChangeWatcher::new(roots(), DEBOUNCE, primitive.clone());
        let seen = collecting(&watcher);
        watcher.start().unwrap();

        primitive.emit("/ws/hooks", "lint.json.swp", ChangeKind::Modified);
        primitive.emit("/ws/hooks", "lint.json", ChangeKind::Modified);
        tokio::time::sleep(SETTLE).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event.path, PathBuf::from("/ws/hooks/lint.json"));
    }

    #[tokio::test]
    async fn handler_failure_does_not_block_others() {
        let primitive = Arc::new(FakePrimitive::default());
        let watcher = ChangeWatcher::new(roots(), DEBOUNCE, primitive.clone());
        watcher.on_change(|_: &ConfigChangeEvent| -> anyhow::Result<()> {
            anyhow::bail!("handler broke")
        });
        let seen = collecting(&watcher);
        watcher.start().unwrap();

        primitive.emit("/ws/specs", "a.md", ChangeKind::Modified);
        tokio::time::sleep(SETTLE).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disposed_handler_receives_nothing() {
        let primitive = Arc::new(FakePrimitive::default());
        let watcher = ChangeWatcher::new(roots(), DEBOUNCE, primitive.clone());
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = watcher.on_change(move |_: &ConfigChangeEvent| -> anyhow::Result<()> {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        watcher.start().unwrap();
        sub.dispose();

        primitive.emit("/ws/specs", "a.md", ChangeKind::Modified);
        tokio::time::sleep(SETTLE).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn start_outside_runtime_fails() {
        let watcher = ChangeWatcher::new(roots(), DEBOUNCE, Arc::new(FakePrimitive::default()));
        assert!(watcher.start().is_err());
        assert!(!watcher.is_watching());
    }

    #[test]
    fn notify_kinds_are_classified() {
        use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};
        assert_eq!(
            classify(&EventKind::Create(CreateKind::File)),
            Some(ChangeKind::Created)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(ChangeKind::Modified)
        );
        assert_eq!(
            classify(&EventKind::Remove(RemoveKind::File)),
            Some(ChangeKind::Deleted)
        );
        assert_eq!(classify(&EventKind::Access(AccessKind::Any)), None);
    }
}
