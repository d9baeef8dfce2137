use super::{block_on, open, payload, warn_failures};
use crate::output::{ellipsize, print_json, print_table};
use anyhow::{bail, Context};
use clap::{ArgGroup, Subcommand};
use specflow_core::rule::{Action, AutomationRule, Trigger};
use specflow_core::types::EventType;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum HookSubcommand {
    /// List registered hooks
    List,
    /// Register a new hook
    #[command(group(ArgGroup::new("action").required(true).args(["command", "message"])))]
    Add {
        /// Hook id (lowercase, hyphens)
        id: String,
        /// Event that fires the hook: file_save, message_sent, session_created,
        /// agent_complete or manual
        #[arg(long = "on")]
        event: String,
        /// Glob the saved file must match (file_save only)
        #[arg(long)]
        pattern: Option<String>,
        /// Shell command to run
        #[arg(long)]
        command: Option<String>,
        /// Working directory for --command, relative to the workspace root
        #[arg(long)]
        working_dir: Option<PathBuf>,
        /// Message to send to the agent ({filePath}, {message} and {event} are substituted)
        #[arg(long)]
        message: Option<String>,
        /// Display name (defaults to the id)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Register the hook disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Remove a hook
    Remove { id: String },
    /// Enable a hook
    Enable { id: String },
    /// Disable a hook without removing it
    Disable { id: String },
    /// Run one hook now, regardless of its trigger
    Trigger {
        id: String,
        #[arg(long)]
        file: Option<String>,
        #[arg(long)]
        message: Option<String>,
    },
}

pub fn run(root: &Path, subcmd: HookSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        HookSubcommand::List => list(root, json),
        HookSubcommand::Add {
            id,
            event,
            pattern,
            command,
            working_dir,
            message,
            name,
            description,
            disabled,
        } => {
            let trigger = build_trigger(&event, pattern)?;
            let action = match (command, message) {
                (Some(command), None) => Action::ExecuteCommand {
                    command,
                    working_dir,
                },
                (None, Some(message)) => Action::SendMessage { message },
                _ => bail!("exactly one of --command or --message is required"),
            };
            let name = name.unwrap_or_else(|| id.clone());
            let mut rule = AutomationRule::new(id, name, trigger, action);
            rule.description = description;
            rule.enabled = !disabled;
            add(root, rule, json)
        }
        HookSubcommand::Remove { id } => remove(root, &id, json),
        HookSubcommand::Enable { id } => set_enabled(root, &id, true, json),
        HookSubcommand::Disable { id } => set_enabled(root, &id, false, json),
        HookSubcommand::Trigger { id, file, message } => trigger(root, &id, file, message, json),
    }
}

fn build_trigger(event: &str, pattern: Option<String>) -> anyhow::Result<Trigger> {
    let event_type: EventType = event.parse()?;
    if pattern.is_some() && event_type != EventType::FileSave {
        bail!("--pattern only applies to file_save hooks");
    }
    Ok(match event_type {
        EventType::FileSave => Trigger::FileSave { pattern },
        EventType::MessageSent => Trigger::MessageSent,
        EventType::SessionCreated => Trigger::SessionCreated,
        EventType::AgentComplete => Trigger::AgentComplete,
        EventType::Manual => Trigger::Manual,
    })
}

fn describe_trigger(trigger: &Trigger) -> String {
    match trigger.pattern() {
        Some(pattern) => format!("{} {pattern}", trigger.event_type()),
        None => trigger.event_type().to_string(),
    }
}

fn describe_action(action: &Action) -> String {
    match action {
        Action::ExecuteCommand { command, .. } => format!("run: {}", ellipsize(command, 40)),
        Action::SendMessage { message } => format!("ask: {}", ellipsize(message, 40)),
    }
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let rules = block_on(async { Ok::<_, anyhow::Error>(open(root).await?.engine().list()) })?;

    if json {
        return print_json(&rules);
    }
    if rules.is_empty() {
        println!("No hooks registered.");
        return Ok(());
    }
    let rows = rules
        .iter()
        .map(|r| {
            vec![
                r.id.clone(),
                describe_trigger(&r.trigger),
                describe_action(&r.action),
                if r.enabled { "yes" } else { "no" }.to_string(),
            ]
        })
        .collect();
    print_table(&["ID", "TRIGGER", "ACTION", "ENABLED"], rows);
    Ok(())
}

fn add(root: &Path, rule: AutomationRule, json: bool) -> anyhow::Result<()> {
    let id = rule.id.clone();
    block_on(async {
        open(root)
            .await?
            .engine()
            .register(rule.clone())
            .await
            .with_context(|| format!("failed to add hook '{id}'"))
    })?;

    if json {
        print_json(&rule)?;
    } else {
        println!("Added hook '{id}' ({})", describe_trigger(&rule.trigger));
    }
    Ok(())
}

fn remove(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let rule = block_on(async {
        open(root)
            .await?
            .engine()
            .remove(id)
            .await
            .with_context(|| format!("failed to remove hook '{id}'"))
    })?;

    if json {
        print_json(&serde_json::json!({ "id": rule.id, "removed": true }))?;
    } else {
        println!("Removed hook '{}'", rule.id);
    }
    Ok(())
}

fn set_enabled(root: &Path, id: &str, enabled: bool, json: bool) -> anyhow::Result<()> {
    let rule = block_on(async {
        open(root)
            .await?
            .engine()
            .set_enabled(id, enabled)
            .await
            .with_context(|| format!("failed to update hook '{id}'"))
    })?;

    if json {
        print_json(&serde_json::json!({ "id": rule.id, "enabled": rule.enabled }))?;
    } else if enabled {
        println!("Enabled hook '{id}'");
    } else {
        println!("Disabled hook '{id}'");
    }
    Ok(())
}

fn trigger(
    root: &Path,
    id: &str,
    file: Option<String>,
    message: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let result = block_on(async {
        let ws = open(root).await?;
        if ws.engine().get(id).is_none() {
            bail!("hook '{id}' not found");
        }
        Ok::<_, anyhow::Error>(ws.engine().trigger(id, Some(payload(file, message))).await)
    })?;

    if json {
        print_json(&result)?;
    } else if let Some(output) = result.output.as_deref() {
        println!("{output}");
    }
    warn_failures(std::slice::from_ref(&result));
    Ok(())
}
