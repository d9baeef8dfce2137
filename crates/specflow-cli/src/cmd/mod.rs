pub mod dispatch;
pub mod hook;
pub mod init;
pub mod watch;

use anyhow::Context;
use specflow_core::event::EventPayload;
use specflow_core::executor::DispatchResult;
use specflow_core::workspace::Workspace;
use std::future::Future;
use std::path::Path;

/// Run an async command body on a fresh multi-threaded runtime.
pub(crate) fn block_on<F, T>(fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    rt.block_on(fut)
}

pub(crate) async fn open(root: &Path) -> anyhow::Result<Workspace> {
    Workspace::open(root)
        .await
        .with_context(|| format!("failed to open workspace at {}", root.display()))
}

pub(crate) fn payload(file: Option<String>, message: Option<String>) -> EventPayload {
    EventPayload {
        file_path: file,
        message,
        spec: None,
    }
}

/// Action failures are reported, not fatal.
pub(crate) fn warn_failures(results: &[DispatchResult]) {
    for r in results.iter().filter(|r| !r.success) {
        eprintln!(
            "warning: hook '{}' failed: {}",
            r.rule_id,
            r.error.as_deref().unwrap_or("unknown error")
        );
    }
}
