//! One workspace session: stores, hook engine, watcher, reload coordinator
//! and workflow controller wired together for a single root.

use crate::approval::WorkspaceFs;
use crate::config::{Config, WarnLevel};
use crate::engine::HookEngine;
use crate::error::Result;
use crate::executor::{ActionExecutor, AgentCommandSink, ShellRunner};
use crate::io;
use crate::paths;
use crate::reload::ReloadCoordinator;
use crate::store::{DocumentStore, FsDocumentStore};
use crate::types::Category;
use crate::watcher::{ChangeWatcher, NotifyWatchPrimitive, WatchPrimitive, WatchRoot};
use crate::workflow::WorkflowController;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct Workspace {
    root: PathBuf,
    config: Config,
    specs: Arc<FsDocumentStore>,
    hooks: Arc<FsDocumentStore>,
    steering: Arc<FsDocumentStore>,
    engine: Arc<HookEngine>,
    reload: ReloadCoordinator,
    watcher: ChangeWatcher,
    workflow: WorkflowController,
}

impl Workspace {
    /// Create `.specflow/` with its three document directories and a default
    /// config. Existing files are left alone. Returns true if the config was
    /// written.
    pub fn init(root: &Path) -> Result<bool> {
        for category in Category::all() {
            io::ensure_dir(&paths::category_dir(root, *category))?;
        }
        let config = serde_yaml::to_string(&Config::default())?;
        io::write_if_missing(&paths::config_path(root), config.as_bytes())
    }

    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with(root, Arc::new(NotifyWatchPrimitive)).await
    }

    /// Open with a custom watch primitive.
    pub async fn open_with(
        root: impl Into<PathBuf>,
        primitive: Arc<dyn WatchPrimitive>,
    ) -> Result<Self> {
        let root = root.into();
        let config = Config::load(&root)?;
        for warning in config.validate() {
            match warning.level {
                WarnLevel::Error => tracing::error!("{}", warning.message),
                WarnLevel::Warning => tracing::warn!("{}", warning.message),
            }
        }

        let store = |category: Category| {
            Arc::new(FsDocumentStore::new(
                paths::category_dir(&root, category),
                paths::category_extension(category),
            ))
        };
        let specs = store(Category::Specs);
        let hooks = store(Category::Hooks);
        let steering = store(Category::Steering);

        let timeout = config.hooks.command_timeout();
        let mut executor =
            ActionExecutor::new(&root).with_runner(Arc::new(ShellRunner::new(timeout)));
        if let Some(command) = config.agent.command.as_deref().filter(|c| !c.trim().is_empty()) {
            executor = executor.with_message_sink(Arc::new(
                AgentCommandSink::new(command, &root).with_timeout(timeout),
            ));
        }

        let engine = Arc::new(HookEngine::new(hooks.clone(), executor));
        specs.refresh().await?;
        steering.refresh().await?;
        engine.reload().await?;

        let reload = ReloadCoordinator::new()
            .with(Category::Specs, specs.clone())
            .with(Category::Hooks, engine.clone())
            .with(Category::Steering, steering.clone());

        let roots = Category::all()
            .iter()
            .map(|category| {
                let watch_root = WatchRoot::new(*category, paths::category_dir(&root, *category));
                match config.watch.pattern_for(*category) {
                    Some(pattern) => watch_root.with_pattern(pattern),
                    None => watch_root,
                }
            })
            .collect();
        let watcher = ChangeWatcher::new(roots, config.watch.debounce(), primitive);
        watcher.on_change(reload.clone());

        let workflow =
            WorkflowController::new(engine.clone(), Arc::new(WorkspaceFs::new(&root)));

        tracing::debug!(root = %root.display(), rules = engine.list().len(), "workspace opened");
        Ok(Self {
            root,
            config,
            specs,
            hooks,
            steering,
            engine,
            reload,
            watcher,
            workflow,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Arc<HookEngine> {
        &self.engine
    }

    pub fn workflow(&self) -> &WorkflowController {
        &self.workflow
    }

    pub fn reload(&self) -> &ReloadCoordinator {
        &self.reload
    }

    pub fn watcher(&self) -> &ChangeWatcher {
        &self.watcher
    }

    pub fn store(&self, category: Category) -> &Arc<FsDocumentStore> {
        match category {
            Category::Specs => &self.specs,
            Category::Hooks => &self.hooks,
            Category::Steering => &self.steering,
        }
    }

    /// Begin watching the three document roots, creating any that are missing.
    pub fn start_watching(&self) -> Result<()> {
        for root in self.watcher.roots() {
            io::ensure_dir(&root.path)?;
        }
        self.watcher.start()
    }

    pub fn stop_watching(&self) {
        self.watcher.stop();
    }
}
