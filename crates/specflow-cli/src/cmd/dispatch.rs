use super::{block_on, open, payload, warn_failures};
use crate::output::{ellipsize, print_json, print_table};
use specflow_core::event::HookEvent;
use specflow_core::types::EventType;
use std::path::Path;

pub fn run(
    root: &Path,
    event: &str,
    file: Option<String>,
    message: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let event_type: EventType = event.parse()?;
    let event = HookEvent::new(event_type, payload(file, message));

    let results = block_on(async {
        let ws = open(root).await?;
        Ok::<_, anyhow::Error>(ws.engine().dispatch(&event).await)
    })?;

    if json {
        print_json(&results)?;
    } else if results.is_empty() {
        println!("No hooks matched {event_type}.");
    } else {
        let rows = results
            .iter()
            .map(|r| {
                vec![
                    r.rule_id.clone(),
                    if r.success { "ok" } else { "failed" }.to_string(),
                    format!("{}ms", r.duration_ms),
                    ellipsize(
                        r.output.as_deref().or(r.error.as_deref()).unwrap_or(""),
                        60,
                    ),
                ]
            })
            .collect();
        print_table(&["HOOK", "STATUS", "TIME", "OUTPUT"], rows);
    }
    warn_failures(&results);
    Ok(())
}
