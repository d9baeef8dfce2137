use super::{block_on, open};
use anyhow::Context;
use specflow_core::reload::ReloadOutcome;
use specflow_core::watcher::ConfigChangeEvent;
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    block_on(async {
        let ws = open(root).await?;

        for outcome in ws.reload().reload_all().await {
            if let ReloadOutcome::Failed(failure) = outcome {
                eprintln!("warning: {} failed to load: {}", failure.category, failure.message);
            }
        }

        let root_buf = root.to_path_buf();
        ws.watcher()
            .on_change(move |change: &ConfigChangeEvent| -> anyhow::Result<()> {
                let path = &change.event.path;
                let shown = path.strip_prefix(&root_buf).unwrap_or(path);
                println!("{} {} ({})", change.category, shown.display(), change.event.kind);
                Ok(())
            });

        ws.start_watching().context("failed to start watching")?;
        println!(
            "Watching {} for spec, hook and steering changes (Ctrl-C to stop)",
            root.display()
        );

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        ws.stop_watching();
        Ok::<_, anyhow::Error>(())
    })
}
