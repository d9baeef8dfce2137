//! Hook engine: holds automation rules and dispatches workspace events to them.
//!
//! Rules are kept in registration order and persisted through the hooks
//! [`DocumentStore`], one JSON document per rule named after its id. A reload
//! keeps live rules in place and appends new documents by registration time,
//! so dispatch order survives hot reloads and restarts. Action failures are
//! captured into [`DispatchResult`]s and logged; `dispatch` never returns an
//! error.

use crate::error::{Result, SpecflowError};
use crate::event::{EventPayload, HookEvent};
use crate::executor::{ActionExecutor, DispatchResult};
use crate::matcher;
use crate::registry::{Registry, Subscription};
use crate::rule::AutomationRule;
use crate::store::{DocumentStore, Reloadable};
use crate::types::EventType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glob::Pattern;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Called after every dispatch of the event type it was registered for.
pub type EventListener =
    Arc<dyn Fn(&HookEvent, &[DispatchResult]) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
struct RuleEntry {
    rule: AutomationRule,
    pattern: Option<Pattern>,
}

impl RuleEntry {
    fn compile(rule: AutomationRule) -> Result<Self> {
        rule.validate()?;
        let pattern = rule
            .trigger
            .pattern()
            .map(matcher::compile_pattern)
            .transpose()?;
        Ok(Self { rule, pattern })
    }
}

pub struct HookEngine {
    rules: RwLock<Vec<RuleEntry>>,
    owners: Mutex<HashMap<String, Vec<String>>>,
    store: Arc<dyn DocumentStore>,
    executor: ActionExecutor,
    listeners: Registry<(EventType, EventListener)>,
    /// Serializes persisting mutations with reload so a reload never
    /// overwrites a rule registered while it was reading the store.
    writes: tokio::sync::Mutex<()>,
}

impl HookEngine {
    pub fn new(store: Arc<dyn DocumentStore>, executor: ActionExecutor) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            owners: Mutex::new(HashMap::new()),
            store,
            executor,
            listeners: Registry::new(),
            writes: tokio::sync::Mutex::new(()),
        }
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    fn read_rules(&self) -> std::sync::RwLockReadGuard<'_, Vec<RuleEntry>> {
        self.rules.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_rules(&self) -> std::sync::RwLockWriteGuard<'_, Vec<RuleEntry>> {
        self.rules.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn owners(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<String>>> {
        self.owners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Validate, store and persist a rule.
    pub async fn register(&self, rule: AutomationRule) -> Result<()> {
        let _writes = self.writes.lock().await;
        let mut entry = RuleEntry::compile(rule)?;
        let id = entry.rule.id.clone();
        let json = {
            let mut rules = self.write_rules();
            if rules.iter().any(|e| e.rule.id == id) {
                return Err(SpecflowError::Duplicate { kind: "rule", id });
            }
            if entry.rule.registered_at.is_none() {
                entry.rule.registered_at = Some(next_stamp(&rules));
            }
            let json = entry.rule.to_json()?;
            rules.push(entry);
            json
        };

        if let Err(e) = self.store.save(&id, &json).await {
            self.write_rules().retain(|entry| entry.rule.id != id);
            tracing::warn!(
                rule_id = %id,
                error = %e,
                "failed to persist rule, registration rolled back"
            );
            return Err(e);
        }
        tracing::info!(rule_id = %id, "rule registered");
        Ok(())
    }

    /// Register a rule on behalf of `owner`; see [`HookEngine::remove_owned`].
    pub async fn register_owned(&self, owner: &str, rule: AutomationRule) -> Result<()> {
        let id = rule.id.clone();
        self.register(rule).await?;
        self.owners().entry(owner.to_string()).or_default().push(id);
        Ok(())
    }

    /// Remove every rule registered by `owner`. Returns the removed ids.
    pub async fn remove_owned(&self, owner: &str) -> Result<Vec<String>> {
        let ids = self.owners().remove(owner).unwrap_or_default();
        let mut removed = Vec::new();
        let mut first_error = None;
        for id in ids {
            match self.remove(&id).await {
                Ok(_) => removed.push(id),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    tracing::warn!(
                        owner,
                        rule_id = %id,
                        error = %e,
                        "failed to remove owned rule"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    /// Remove a rule and its persisted document.
    pub async fn remove(&self, id: &str) -> Result<AutomationRule> {
        let _writes = self.writes.lock().await;
        let (index, entry) = {
            let mut rules = self.write_rules();
            let index = rules
                .iter()
                .position(|e| e.rule.id == id)
                .ok_or_else(|| SpecflowError::rule_not_found(id))?;
            (index, rules.remove(index))
        };

        if let Err(e) = self.store.delete(id).await {
            let mut rules = self.write_rules();
            let at = index.min(rules.len());
            rules.insert(at, entry);
            return Err(e);
        }

        for ids in self.owners().values_mut() {
            ids.retain(|owned| owned != id);
        }
        tracing::info!(rule_id = %id, "rule removed");
        Ok(entry.rule)
    }

    pub fn list(&self) -> Vec<AutomationRule> {
        self.read_rules().iter().map(|e| e.rule.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<AutomationRule> {
        self.read_rules()
            .iter()
            .find(|e| e.rule.id == id)
            .map(|e| e.rule.clone())
    }

    /// Toggle a rule and persist the new flag.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<AutomationRule> {
        let _writes = self.writes.lock().await;
        let (previous, rule) = {
            let mut rules = self.write_rules();
            let entry = rules
                .iter_mut()
                .find(|e| e.rule.id == id)
                .ok_or_else(|| SpecflowError::rule_not_found(id))?;
            let previous = entry.rule.enabled;
            entry.rule.enabled = enabled;
            (previous, entry.rule.clone())
        };

        let persisted = match rule.to_json() {
            Ok(json) => self.store.save(id, &json).await,
            Err(e) => Err(e),
        };
        if let Err(e) = persisted {
            if let Some(entry) = self.write_rules().iter_mut().find(|e| e.rule.id == id) {
                entry.rule.enabled = previous;
            }
            return Err(e);
        }
        tracing::info!(rule_id = %id, enabled, "rule toggled");
        Ok(rule)
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Run every enabled rule whose trigger matches `event`, in registration
    /// order, then notify listeners for the event type.
    pub async fn dispatch(&self, event: &HookEvent) -> Vec<DispatchResult> {
        let matching: Vec<AutomationRule> = self
            .read_rules()
            .iter()
            .filter(|e| e.rule.enabled)
            .filter(|e| matcher::trigger_matches(&e.rule.trigger, e.pattern.as_ref(), event))
            .map(|e| e.rule.clone())
            .collect();

        tracing::debug!(event = %event.event_type, rules = matching.len(), "dispatching event");

        let mut results = Vec::with_capacity(matching.len());
        for rule in &matching {
            let result = self.executor.execute(rule, event).await;
            if !result.success {
                tracing::warn!(
                    rule_id = %result.rule_id,
                    error = result.error.as_deref().unwrap_or(""),
                    "hook action failed"
                );
            }
            results.push(result);
        }

        self.notify(event, &results);
        results
    }

    fn notify(&self, event: &HookEvent, results: &[DispatchResult]) {
        for (event_type, listener) in self.listeners.snapshot() {
            if event_type != event.event_type {
                continue;
            }
            if let Err(e) = listener(event, results) {
                tracing::warn!(event = %event.event_type, error = %e, "event listener failed");
            }
        }
    }

    /// Run one rule directly, whatever its trigger. Unknown or disabled rules
    /// yield a failed result rather than an error.
    pub async fn trigger(&self, id: &str, payload: Option<EventPayload>) -> DispatchResult {
        let Some(rule) = self.get(id) else {
            return DispatchResult::rejected(id, "", format!("rule not found: {id}"));
        };
        if !rule.enabled {
            return DispatchResult::rejected(&rule.id, &rule.name, "rule is disabled");
        }
        let event = HookEvent::new(EventType::Manual, payload.unwrap_or_default());
        let result = self.executor.execute(&rule, &event).await;
        if !result.success {
            tracing::warn!(
                rule_id = %rule.id,
                error = result.error.as_deref().unwrap_or(""),
                "manual trigger failed"
            );
        }
        result
    }

    pub fn on<F>(&self, event_type: EventType, listener: F) -> Subscription
    where
        F: Fn(&HookEvent, &[DispatchResult]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listeners.add((event_type, Arc::new(listener)))
    }

    // -----------------------------------------------------------------------
    // Reload
    // -----------------------------------------------------------------------

    /// Rebuild the rule set from the hooks store. Malformed documents are
    /// logged and skipped.
    pub async fn reload(&self) -> Result<usize> {
        let _writes = self.writes.lock().await;
        self.store.refresh().await?;
        let names = self.store.list().await?;
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let loaded = match self.store.load(&name).await {
                Ok(data) => AutomationRule::from_json(&data).and_then(RuleEntry::compile),
                Err(e) => Err(e),
            };
            match loaded {
                Ok(entry) if entry.rule.id == name => entries.push(entry),
                Ok(entry) => tracing::warn!(
                    document = %name,
                    rule_id = %entry.rule.id,
                    "rule id does not match document name, skipped"
                ),
                Err(e) => tracing::warn!(document = %name, error = %e, "malformed rule skipped"),
            }
        }

        // Live rules keep their place. Documents new to the engine follow in
        // registration order, unstamped ones last by name.
        let current: HashMap<String, usize> = self
            .read_rules()
            .iter()
            .enumerate()
            .map(|(i, e)| (e.rule.id.clone(), i))
            .collect();
        entries.sort_by(|a, b| {
            let rank = |e: &RuleEntry| current.get(&e.rule.id).copied().unwrap_or(usize::MAX);
            let (sa, sb) = (a.rule.registered_at, b.rule.registered_at);
            rank(a)
                .cmp(&rank(b))
                .then_with(|| sa.is_none().cmp(&sb.is_none()))
                .then_with(|| sa.cmp(&sb))
                .then_with(|| a.rule.id.cmp(&b.rule.id))
        });

        let count = entries.len();
        *self.write_rules() = entries;
        let live: Vec<String> = self.read_rules().iter().map(|e| e.rule.id.clone()).collect();
        let mut owners = self.owners();
        for ids in owners.values_mut() {
            ids.retain(|id| live.contains(id));
        }
        owners.retain(|_, ids| !ids.is_empty());
        drop(owners);

        tracing::info!(rules = count, "hook rules reloaded");
        Ok(count)
    }
}

/// A registration time later than every live rule's, so a burst of
/// registrations keeps its order once reloaded from disk.
fn next_stamp(rules: &[RuleEntry]) -> DateTime<Utc> {
    let now = Utc::now();
    match rules.iter().filter_map(|e| e.rule.registered_at).max() {
        Some(latest) if latest >= now => latest + chrono::Duration::microseconds(1),
        _ => now,
    }
}

#[async_trait]
impl Reloadable for HookEngine {
    async fn reload(&self) -> Result<usize> {
        HookEngine::reload(self).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ProcessOutput, ProcessRunner};
    use crate::rule::{Action, Trigger};
    use crate::store::MemoryDocumentStore;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every command; commands containing "fail" exit 1.
    #[derive(Default)]
    struct FakeRunner {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProcessRunner for FakeRunner {
        async fn run(&self, command: &str, _cwd: Option<&Path>) -> Result<ProcessOutput> {
            self.calls.lock().unwrap().push(command.to_string());
            let exit_code = if command.contains("fail") { 1 } else { 0 };
            Ok(ProcessOutput {
                stdout: format!("ran {command}"),
                stderr: String::new(),
                exit_code: Some(exit_code),
            })
        }
    }

    struct ReadOnlyStore;

    #[async_trait]
    impl DocumentStore for ReadOnlyStore {
        async fn list(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn load(&self, name: &str) -> Result<String> {
            Err(SpecflowError::document_not_found(name))
        }
        async fn save(&self, _name: &str, _content: &str) -> Result<()> {
            Err(SpecflowError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }
        async fn delete(&self, _name: &str) -> Result<bool> {
            Ok(false)
        }
        async fn refresh(&self) -> Result<usize> {
            Ok(0)
        }
    }

    fn engine_with(store: Arc<dyn DocumentStore>) -> (HookEngine, Arc<FakeRunner>) {
        let runner = Arc::new(FakeRunner::default());
        let executor = ActionExecutor::new(std::env::temp_dir()).with_runner(runner.clone());
        (HookEngine::new(store, executor), runner)
    }

    fn engine() -> (HookEngine, Arc<FakeRunner>) {
        engine_with(Arc::new(MemoryDocumentStore::new()))
    }

    fn command_rule(id: &str, trigger: Trigger, command: &str) -> AutomationRule {
        AutomationRule::new(
            id,
            id,
            trigger,
            Action::ExecuteCommand {
                command: command.to_string(),
                working_dir: None,
            },
        )
    }

    fn on_save(id: &str, pattern: Option<&str>) -> AutomationRule {
        command_rule(
            id,
            Trigger::FileSave {
                pattern: pattern.map(str::to_string),
            },
            &format!("echo {id}"),
        )
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_invalid_rules() {
        let (engine, _) = engine();
        engine.register(on_save("lint", None)).await.unwrap();
        let err = engine.register(on_save("lint", None)).await.unwrap_err();
        assert!(matches!(err, SpecflowError::Duplicate { .. }));

        let bad = command_rule("empty", Trigger::Manual, "");
        assert!(matches!(
            engine.register(bad).await,
            Err(SpecflowError::Validation(_))
        ));
        assert_eq!(engine.list().len(), 1);
    }

    #[tokio::test]
    async fn persistence_failure_rolls_back() {
        let (engine, _) = engine_with(Arc::new(ReadOnlyStore));
        assert!(engine.register(on_save("lint", None)).await.is_err());
        assert!(engine.list().is_empty());
    }

    #[tokio::test]
    async fn dispatch_runs_each_enabled_match_once_in_order() {
        let (engine, runner) = engine();
        engine.register(on_save("first", None)).await.unwrap();
        engine
            .register(on_save("off", None).disabled())
            .await
            .unwrap();
        engine
            .register(command_rule("msg", Trigger::MessageSent, "echo msg"))
            .await
            .unwrap();
        engine.register(on_save("second", None)).await.unwrap();

        let results = engine.dispatch(&HookEvent::file_save("a.rs")).await;
        let ids: Vec<_> = results.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(ids, ["first", "second"]);
        assert_eq!(
            runner.calls.lock().unwrap().as_slice(),
            ["echo first", "echo second"]
        );
    }

    #[tokio::test]
    async fn dispatch_gates_on_pattern() {
        let (engine, _) = engine();
        engine
            .register(on_save("ts-only", Some("**/*.ts")))
            .await
            .unwrap();
        assert_eq!(engine.dispatch(&HookEvent::file_save("src/a.ts")).await.len(), 1);
        assert!(engine.dispatch(&HookEvent::file_save("src/a.js")).await.is_empty());
    }

    #[tokio::test]
    async fn failure_is_isolated_per_rule() {
        let (engine, _) = engine();
        engine.register(on_save("a", None)).await.unwrap();
        engine
            .register(command_rule(
                "b",
                Trigger::FileSave { pattern: None },
                "please fail",
            ))
            .await
            .unwrap();
        engine.register(on_save("c", None)).await.unwrap();

        let results = engine.dispatch(&HookEvent::file_save("x")).await;
        let flags: Vec<_> = results.iter().map(|r| r.success).collect();
        assert_eq!(flags, [true, false, true]);
        assert!(results[1].error.as_deref().unwrap().contains("exited with code 1"));
    }

    #[tokio::test]
    async fn trigger_ignores_trigger_type_but_not_enabled() {
        let (engine, _) = engine();
        engine.register(on_save("save", Some("*.md"))).await.unwrap();
        engine
            .register(on_save("off", None).disabled())
            .await
            .unwrap();

        let ok = engine.trigger("save", None).await;
        assert!(ok.success);
        assert_eq!(ok.output.as_deref(), Some("ran echo save"));

        let off = engine.trigger("off", None).await;
        assert!(!off.success);
        assert_eq!(off.error.as_deref(), Some("rule is disabled"));

        let missing = engine.trigger("ghost", None).await;
        assert!(!missing.success);
        assert!(missing.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn set_enabled_toggles_and_persists() {
        let store = Arc::new(MemoryDocumentStore::new());
        let (engine, _) = engine_with(store.clone());
        engine.register(on_save("lint", None)).await.unwrap();
        let rule = engine.set_enabled("lint", false).await.unwrap();
        assert!(!rule.enabled);
        assert!(engine.dispatch(&HookEvent::file_save("a")).await.is_empty());

        let persisted = AutomationRule::from_json(&store.load("lint").await.unwrap()).unwrap();
        assert!(!persisted.enabled);
        assert!(engine.set_enabled("ghost", true).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn remove_deletes_document() {
        let store = Arc::new(MemoryDocumentStore::new());
        let (engine, _) = engine_with(store.clone());
        engine.register(on_save("lint", None)).await.unwrap();
        let removed = engine.remove("lint").await.unwrap();
        assert_eq!(removed.id, "lint");
        assert!(store.list().await.unwrap().is_empty());
        assert!(engine.remove("lint").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn reload_round_trips_registered_rules() {
        let store = Arc::new(MemoryDocumentStore::new());
        let (engine, _) = engine_with(store.clone());
        engine
            .register(on_save("b-rule", Some("**/*.ts")))
            .await
            .unwrap();
        engine
            .register(on_save("a-rule", None).disabled())
            .await
            .unwrap();
        store.save("broken", "{ not json").await.unwrap();

        let (fresh, _) = engine_with(store.clone());
        assert_eq!(fresh.reload().await.unwrap(), 2);
        assert_eq!(fresh.list(), engine.list());
        let ids: Vec<_> = fresh.list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["b-rule", "a-rule"]);
    }

    #[tokio::test]
    async fn reload_keeps_dispatch_in_registration_order() {
        let store = Arc::new(MemoryDocumentStore::new());
        let (engine, runner) = engine_with(store.clone());
        engine.register(on_save("zeta", None)).await.unwrap();
        engine.register(on_save("alpha", None)).await.unwrap();
        // A hand-written document with no registration stamp goes last.
        let manual = on_save("middle", None).to_json().unwrap();
        store.save("middle", &manual).await.unwrap();

        assert_eq!(engine.reload().await.unwrap(), 3);
        engine.set_enabled("zeta", true).await.unwrap();
        engine.reload().await.unwrap();

        let results = engine.dispatch(&HookEvent::file_save("a.rs")).await;
        let ids: Vec<_> = results.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(ids, ["zeta", "alpha", "middle"]);
        assert_eq!(
            runner.calls.lock().unwrap().as_slice(),
            ["echo zeta", "echo alpha", "echo middle"]
        );
    }

    #[tokio::test]
    async fn registration_stamps_increase() {
        let (engine, _) = engine();
        for id in ["c", "b", "a"] {
            engine.register(on_save(id, None)).await.unwrap();
        }
        let stamps: Vec<_> = engine
            .list()
            .into_iter()
            .map(|r| r.registered_at.unwrap())
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]), "{stamps:?}");
    }

    #[tokio::test]
    async fn listeners_are_isolated_and_disposable() {
        let (engine, _) = engine();
        engine.register(on_save("lint", None)).await.unwrap();
        let seen = Arc::new(AtomicUsize::new(0));

        let _failing = engine.on(EventType::FileSave, |_, _| anyhow::bail!("boom"));
        let counter = seen.clone();
        let sub = engine.on(EventType::FileSave, move |_, results| {
            counter.fetch_add(results.len(), Ordering::SeqCst);
            Ok(())
        });
        let other = seen.clone();
        let _msg = engine.on(EventType::MessageSent, move |_, _| {
            other.fetch_add(100, Ordering::SeqCst);
            Ok(())
        });

        engine.dispatch(&HookEvent::file_save("a")).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        sub.dispose();
        engine.dispatch(&HookEvent::file_save("a")).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remove_owned_tears_down_group() {
        let (engine, _) = engine();
        engine
            .register_owned("plugin", on_save("p1", None))
            .await
            .unwrap();
        engine.register(on_save("mine", None)).await.unwrap();
        engine
            .register_owned("plugin", on_save("p2", None))
            .await
            .unwrap();
        engine.remove("p2").await.unwrap();

        let removed = engine.remove_owned("plugin").await.unwrap();
        assert_eq!(removed, vec!["p1".to_string()]);
        let ids: Vec<_> = engine.list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["mine"]);
    }
}
