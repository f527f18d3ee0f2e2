//! Compensation stack for multi-step workflows.
//!
//! Each committed step that has an undo pushes a labelled compensation.
//! On failure the stack is unwound in reverse order; a compensation that
//! itself fails is logged and counted, never returned, so the caller
//! still sees the original error.

use metrics::counter;
use std::future::Future;
use std::pin::Pin;

use crate::metrics::COMPENSATIONS_TOTAL;

type CompensationFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
type Compensation<'a> = Box<dyn FnOnce() -> CompensationFuture<'a> + Send + 'a>;

/// Undo actions for the steps a workflow has committed so far.
pub struct Compensations<'a> {
    workflow: &'static str,
    steps: Vec<(&'static str, Compensation<'a>)>,
}

impl<'a> Compensations<'a> {
    pub fn new(workflow: &'static str) -> Self {
        Self {
            workflow,
            steps: Vec::new(),
        }
    }

    /// Register the undo for a step that just committed.
    pub fn push<F, Fut>(&mut self, step: &'static str, undo: F)
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'a,
    {
        self.steps.push((step, Box::new(move || Box::pin(undo()))));
    }

    /// Run every compensation, most recent first.  Returns the number of
    /// compensations that failed.
    pub async fn unwind(self) -> usize {
        let mut failures = 0;
        for (step, undo) in self.steps.into_iter().rev() {
            match undo().await {
                Ok(()) => {
                    tracing::info!(workflow = self.workflow, step, "compensation applied");
                    counter!(COMPENSATIONS_TOTAL, "step" => step, "result" => "ok").increment(1);
                }
                Err(e) => {
                    failures += 1;
                    tracing::error!(
                        workflow = self.workflow,
                        step,
                        error = %e,
                        "compensation failed; manual cleanup required"
                    );
                    counter!(COMPENSATIONS_TOTAL, "step" => step, "result" => "error")
                        .increment(1);
                }
            }
        }
        failures
    }

    /// The workflow succeeded; drop every compensation unrun.
    pub fn commit(self) {}
}
