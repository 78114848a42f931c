//! Stop hooks.
//!
//! Hats that acquire resources (processes, connections) register a hook to
//! release them. Hooks run in reverse registration order when a run stops;
//! a failing or slow hook never prevents the others from running.

use crate::context::Context;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Failure reported by a stop hook
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct HookError {
    /// What went wrong
    pub reason: String,
}

impl HookError {
    /// Create a hook error
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Resource cleanup run when a run stops
#[async_trait]
pub trait StopHook: Send + Sync {
    /// Name used in logs and reports
    fn name(&self) -> &str;

    /// Release resources
    async fn stop(&self) -> Result<(), HookError>;
}

struct FnStopHook<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> StopHook for FnStopHook<F>
where
    F: Fn() -> BoxFuture<'static, Result<(), HookError>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn stop(&self) -> Result<(), HookError> {
        (self.f)().await
    }
}

/// Build a stop hook from an async closure
pub fn stop_hook<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn StopHook>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HookError>> + Send + 'static,
{
    Arc::new(FnStopHook {
        name: name.into(),
        f: move || -> BoxFuture<'static, Result<(), HookError>> { Box::pin(f()) },
    })
}

/// Register a stop hook on a context
#[must_use]
pub fn add_stop_hook(context: Context, hook: Arc<dyn StopHook>) -> Context {
    context.with_stop_hook(hook)
}

/// What happened when stop hooks ran
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Hooks that finished cleanly, in run order
    pub completed: Vec<String>,
    /// Hooks that failed or panicked, with the reason
    pub failed: Vec<(String, String)>,
    /// Hooks abandoned after the timeout
    pub timed_out: Vec<String>,
}

impl StopReport {
    /// Check if every hook finished cleanly
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }
}

/// Run and clear the context's stop hooks
///
/// Hooks run newest first, each bounded by `timeout`. Errors and panics are
/// logged and collected in the report. The returned context has no hooks
/// left, so running again is a no-op.
pub async fn run_stop_hooks(context: Context, timeout: Duration) -> (Context, StopReport) {
    let (context, hooks) = context.take_stop_hooks();
    let mut report = StopReport::default();

    for hook in hooks.into_iter().rev() {
        let name = hook.name().to_string();
        let mut task = tokio::spawn(async move { hook.stop().await });

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Ok(()))) => {
                tracing::debug!(hook = %name, "stop hook finished");
                report.completed.push(name);
            }
            Ok(Ok(Err(error))) => {
                tracing::warn!(hook = %name, error = %error, "stop hook failed");
                report.failed.push((name, error.reason));
            }
            Ok(Err(join)) => {
                tracing::warn!(hook = %name, error = %join, "stop hook panicked");
                report.failed.push((name, join.to_string()));
            }
            Err(_) => {
                task.abort();
                tracing::warn!(hook = %name, ?timeout, "stop hook timed out");
                report.timed_out.push(name);
            }
        }
    }

    (context, report)
}
