//! The walk: entry-by-entry evaluation of a committed flow.

use futures_util::future;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value, json};
use std::sync::Arc;

use super::queue::TaskQueue;
use crate::context::{RuntimeContext, StepContext};
use crate::events::{RunEvent, WorkflowStateView};
use crate::flow::{FlowEntry, LoopKind, Predicate};
use crate::step::{Step, StepOutcome};
use crate::store::RunStateStore;
use crate::types::{ExecutionPath, StepResult, SuspendedStep, WorkflowResult};
use crate::workflow::Workflow;

/// Resume descriptor: target step ids plus the new payload.
#[derive(Clone, Debug)]
pub(crate) struct ResumePlan {
    pub steps: Vec<String>,
    pub resume_data: Value,
}

impl ResumePlan {
    fn targets(&self, step_id: &str) -> bool {
        self.steps.iter().any(|id| id == step_id)
    }
}

/// Per-walk immutable context.
struct WalkCtx {
    init_data: Value,
    runtime_context: RuntimeContext,
}

/// Outcome of evaluating one entry (or one step within it).
enum EntryOutcome {
    Completed(Value),
    Failed(String),
    Suspended,
}

/// Drives a committed flow against a run's store.
///
/// The engine never returns an error for a normal step failure; it yields
/// a failed [`WorkflowResult`]. Status transitions and workflow-level
/// events are the façade's responsibility.
pub(crate) struct ExecutionEngine {
    workflow: Workflow,
    store: Arc<RunStateStore>,
    run_id: String,
    workflow_id: String,
}

impl ExecutionEngine {
    pub(crate) fn new(workflow: Workflow, store: Arc<RunStateStore>) -> Self {
        let run_id = store.run_id();
        let workflow_id = store.workflow_id();
        Self {
            workflow,
            store,
            run_id,
            workflow_id,
        }
    }

    /// Walk the flow from the head.
    ///
    /// With a [`ResumePlan`], completed steps outside the target set are
    /// reconstructed from the store instead of re-executing (their cached
    /// output feeds the next entry); the walk otherwise behaves as a fresh
    /// start.
    pub(crate) async fn run(
        &self,
        input: Value,
        runtime_context: RuntimeContext,
        resume: Option<ResumePlan>,
    ) -> WorkflowResult {
        let wctx = WalkCtx {
            init_data: input.clone(),
            runtime_context,
        };
        self.store.update_execution_context(self.execution_context());

        // Single-concurrency primary queue: all top-level entry evaluations
        // within one run are serialised through it.
        let primary = TaskQueue::new(1);
        let mut feed = input;
        for (index, entry) in self.workflow.entries().iter().enumerate() {
            let outcome = primary
                .run(self.execute_entry(index, entry, feed.clone(), &wctx, resume.as_ref()))
                .await;
            match outcome {
                EntryOutcome::Completed(value) => feed = value,
                EntryOutcome::Failed(error) => return self.failed_result(error),
                EntryOutcome::Suspended => return self.suspended_result(),
            }
        }
        self.completed_result(feed)
    }

    fn execution_context(&self) -> FxHashMap<String, Value> {
        let mut context = FxHashMap::default();
        context.insert(
            "retryConfig".to_string(),
            serde_json::to_value(self.workflow.retry_config()).unwrap_or(Value::Null),
        );
        context.insert("graphHash".to_string(), json!(self.workflow.graph_hash()));
        context
    }

    async fn execute_entry(
        &self,
        index: usize,
        entry: &FlowEntry,
        input: Value,
        wctx: &WalkCtx,
        resume: Option<&ResumePlan>,
    ) -> EntryOutcome {
        self.store.update_execution_path(vec![index]);
        match entry {
            FlowEntry::Step { step } => {
                self.execute_step(step, input, vec![index], wctx, resume)
                    .await
            }
            FlowEntry::Parallel { steps } => {
                self.execute_parallel(index, steps, input, wctx, resume).await
            }
            FlowEntry::Conditional { predicates, steps } => {
                self.execute_conditional(index, predicates, steps, input, wctx, resume)
                    .await
            }
            FlowEntry::Loop {
                step,
                predicate,
                kind,
            } => {
                self.execute_loop(index, step, predicate, *kind, input, wctx, resume)
                    .await
            }
            FlowEntry::Foreach { step, concurrency } => {
                self.execute_foreach(index, step, *concurrency, input, wctx, resume)
                    .await
            }
        }
    }

    async fn execute_step(
        &self,
        step: &Step,
        input: Value,
        path: ExecutionPath,
        wctx: &WalkCtx,
        resume: Option<&ResumePlan>,
    ) -> EntryOutcome {
        let resuming = resume.is_some_and(|plan| plan.targets(step.id()));
        if resume.is_some() && !resuming {
            if let Some(output) = self.cached_output(step.id()) {
                return EntryOutcome::Completed(output);
            }
        }

        self.store.update_execution_path(path.clone());
        self.store.set_current_step(Some(step.id().to_string()));
        self.record_step(step.id(), StepResult::Running);

        // Input validation is skipped on resume; the resume payload has its
        // own schema instead.
        if resuming {
            if let Some(schema) = step.resume_schema() {
                let plan = resume.expect("resuming implies a plan");
                let subject = format!("resume payload for step '{}'", step.id());
                if let Err(err) = schema.validate(&subject, &plan.resume_data) {
                    self.store.set_current_step(None);
                    self.record_step(step.id(), StepResult::Failed {
                        error: err.to_string(),
                    });
                    return EntryOutcome::Failed(err.to_string());
                }
            }
        } else if let Some(schema) = step.input_schema() {
            let subject = format!("input for step '{}'", step.id());
            if let Err(err) = schema.validate(&subject, &input) {
                self.store.set_current_step(None);
                self.record_step(step.id(), StepResult::Failed {
                    error: err.to_string(),
                });
                return EntryOutcome::Failed(err.to_string());
            }
        }

        let ctx = StepContext::new(
            input,
            self.run_id.clone(),
            self.workflow_id.clone(),
            wctx.init_data.clone(),
            Arc::clone(&self.store),
            wctx.runtime_context.clone(),
            resuming.then(|| resume.expect("resuming implies a plan").resume_data.clone()),
            resuming,
        );

        let outcome = step.execute(ctx).await;
        // Cleared on every exit path, including suspension and failure.
        self.store.set_current_step(None);

        match outcome {
            Ok(StepOutcome::Complete(output)) => {
                if let Some(schema) = step.output_schema() {
                    let subject = format!("output of step '{}'", step.id());
                    if let Err(err) = schema.validate(&subject, &output) {
                        self.record_step(step.id(), StepResult::Failed {
                            error: err.to_string(),
                        });
                        return EntryOutcome::Failed(err.to_string());
                    }
                }
                self.record_step(step.id(), StepResult::Completed {
                    output: output.clone(),
                });
                self.clear_suspended_path(step.id());
                EntryOutcome::Completed(output)
            }
            Ok(StepOutcome::Suspend(payload)) => {
                if let Some(schema) = step.suspend_schema() {
                    let subject = format!("suspend payload of step '{}'", step.id());
                    if let Err(err) = schema.validate(&subject, &payload) {
                        self.record_step(step.id(), StepResult::Failed {
                            error: err.to_string(),
                        });
                        return EntryOutcome::Failed(err.to_string());
                    }
                }
                self.record_step(step.id(), StepResult::Suspended {
                    output: payload,
                    suspended_path: path.clone(),
                });
                self.set_suspended_path(step.id(), path);
                EntryOutcome::Suspended
            }
            Err(err) => {
                let error = err.to_string();
                self.record_step(step.id(), StepResult::Failed {
                    error: error.clone(),
                });
                EntryOutcome::Failed(error)
            }
        }
    }

    async fn execute_parallel(
        &self,
        index: usize,
        steps: &[Step],
        input: Value,
        wctx: &WalkCtx,
        resume: Option<&ResumePlan>,
    ) -> EntryOutcome {
        // Sized to the child count so every child may start.
        let queue = TaskQueue::new(steps.len().max(1));
        let mut tasks = Vec::with_capacity(steps.len());
        for (child_index, step) in steps.iter().enumerate() {
            let queue = queue.clone();
            let input = input.clone();
            tasks.push(async move {
                queue
                    .run(self.execute_step(step, input, vec![index, child_index], wctx, resume))
                    .await
            });
        }
        let outcomes = future::join_all(tasks).await;

        for outcome in &outcomes {
            if let EntryOutcome::Failed(error) = outcome {
                return EntryOutcome::Failed(error.clone());
            }
        }
        if outcomes
            .iter()
            .any(|outcome| matches!(outcome, EntryOutcome::Suspended))
        {
            return EntryOutcome::Suspended;
        }

        let mut output = Map::with_capacity(steps.len());
        for (step, outcome) in steps.iter().zip(outcomes) {
            if let EntryOutcome::Completed(value) = outcome {
                output.insert(step.id().to_string(), value);
            }
        }
        EntryOutcome::Completed(Value::Object(output))
    }

    async fn execute_conditional(
        &self,
        index: usize,
        predicates: &[Predicate],
        steps: &[Step],
        input: Value,
        wctx: &WalkCtx,
        resume: Option<&ResumePlan>,
    ) -> EntryOutcome {
        let ctx = self.predicate_context(input.clone(), wctx);
        for (arm_index, predicate) in predicates.iter().enumerate() {
            match predicate(&ctx) {
                Ok(false) => {}
                Ok(true) => {
                    let step = &steps[arm_index];
                    let outcome = self
                        .execute_step(step, input, vec![index, arm_index], wctx, resume)
                        .await;
                    return match outcome {
                        EntryOutcome::Completed(value) => {
                            let mut output = Map::with_capacity(1);
                            output.insert(step.id().to_string(), value);
                            EntryOutcome::Completed(Value::Object(output))
                        }
                        other => other,
                    };
                }
                Err(err) => {
                    return EntryOutcome::Failed(format!(
                        "condition {arm_index} of entry {index} failed: {err}"
                    ));
                }
            }
        }
        // No match: completed with no output.
        EntryOutcome::Completed(Value::Null)
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_loop(
        &self,
        index: usize,
        step: &Step,
        predicate: &Predicate,
        kind: LoopKind,
        input: Value,
        wctx: &WalkCtx,
        resume: Option<&ResumePlan>,
    ) -> EntryOutcome {
        if resume.is_some_and(|plan| !plan.targets(step.id())) {
            if let Some(output) = self.cached_output(step.id()) {
                return EntryOutcome::Completed(output);
            }
        }

        let mut current = input;
        // Resume data applies to the first body invocation only.
        let mut active_resume = resume;
        loop {
            match self
                .execute_step(step, current.clone(), vec![index], wctx, active_resume)
                .await
            {
                EntryOutcome::Completed(output) => {
                    active_resume = None;
                    let ctx = self.predicate_context(output.clone(), wctx);
                    match predicate(&ctx) {
                        Ok(flag) => {
                            let continue_loop = match kind {
                                LoopKind::DoWhile => flag,
                                LoopKind::DoUntil => !flag,
                            };
                            if continue_loop {
                                current = output;
                            } else {
                                return EntryOutcome::Completed(output);
                            }
                        }
                        Err(err) => {
                            return EntryOutcome::Failed(format!(
                                "loop condition for step '{}' failed: {err}",
                                step.id()
                            ));
                        }
                    }
                }
                other => return other,
            }
        }
    }

    async fn execute_foreach(
        &self,
        index: usize,
        step: &Step,
        concurrency: usize,
        input: Value,
        wctx: &WalkCtx,
        resume: Option<&ResumePlan>,
    ) -> EntryOutcome {
        let concurrency = concurrency.max(1);
        let targeted = resume.is_some_and(|plan| plan.targets(step.id()));
        if resume.is_some() && !targeted {
            if let Some(output) = self.cached_output(step.id()) {
                return EntryOutcome::Completed(output);
            }
        }

        let items = match input {
            Value::Array(items) => items,
            other => {
                let error = format!(
                    "foreach step '{}' expects an array input, got {}",
                    step.id(),
                    json_type_name(&other)
                );
                self.record_step(step.id(), StepResult::Failed {
                    error: error.clone(),
                });
                return EntryOutcome::Failed(error);
            }
        };

        // When resuming, only the item recorded at the suspended path gets
        // the resume payload; earlier items re-execute.
        let resume_item = targeted
            .then(|| {
                self.store
                    .suspended_paths()
                    .get(step.id())
                    .and_then(|path| path.get(1).copied())
            })
            .flatten();

        let queue = TaskQueue::new(concurrency);
        let mut outputs = Vec::with_capacity(items.len());
        for (chunk_index, chunk) in items.chunks(concurrency).enumerate() {
            let mut tasks = Vec::with_capacity(chunk.len());
            for (offset, item) in chunk.iter().enumerate() {
                let item_index = chunk_index * concurrency + offset;
                let queue = queue.clone();
                let item = item.clone();
                let item_resume = if Some(item_index) == resume_item {
                    resume
                } else {
                    None
                };
                tasks.push(async move {
                    queue
                        .run(self.execute_step(step, item, vec![index, item_index], wctx, item_resume))
                        .await
                });
            }
            for outcome in future::join_all(tasks).await {
                match outcome {
                    EntryOutcome::Completed(value) => outputs.push(value),
                    EntryOutcome::Failed(error) => return EntryOutcome::Failed(error),
                    EntryOutcome::Suspended => return EntryOutcome::Suspended,
                }
            }
        }

        // The aggregate array becomes the step's outstanding result so a
        // later resume can reconstruct this entry's feed from the store.
        let output = Value::Array(outputs);
        self.record_step(step.id(), StepResult::Completed {
            output: output.clone(),
        });
        EntryOutcome::Completed(output)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn predicate_context(&self, input: Value, wctx: &WalkCtx) -> StepContext {
        StepContext::new(
            input,
            self.run_id.clone(),
            self.workflow_id.clone(),
            wctx.init_data.clone(),
            Arc::clone(&self.store),
            wctx.runtime_context.clone(),
            None,
            false,
        )
    }

    fn cached_output(&self, step_id: &str) -> Option<Value> {
        match self.store.step_result(step_id) {
            Some(StepResult::Completed { output }) => Some(output),
            _ => None,
        }
    }

    fn record_step(&self, step_id: &str, result: StepResult) {
        self.store.update_step_result(step_id, result.clone());
        let view = WorkflowStateView {
            status: self.store.status(),
            ..Default::default()
        };
        self.store.emit_step_status_update(RunEvent::step_status(
            self.run_id.clone(),
            self.workflow_id.clone(),
            step_id,
            result,
            view,
        ));
    }

    fn set_suspended_path(&self, step_id: &str, path: ExecutionPath) {
        let mut paths = self.store.suspended_paths();
        paths.insert(step_id.to_string(), path);
        self.store.update_suspended_paths(paths);
    }

    fn clear_suspended_path(&self, step_id: &str) {
        let mut paths = self.store.suspended_paths();
        if paths.remove(step_id).is_some() {
            self.store.update_suspended_paths(paths);
        }
    }

    fn completed_result(&self, result: Value) -> WorkflowResult {
        WorkflowResult::Completed {
            result,
            steps: self.store.get_state().step_results,
        }
    }

    fn failed_result(&self, error: String) -> WorkflowResult {
        WorkflowResult::Failed {
            error,
            steps: self.store.get_state().step_results,
        }
    }

    fn suspended_result(&self) -> WorkflowResult {
        let state = self.store.get_state();
        let mut suspended: Vec<SuspendedStep> = state
            .suspended_paths
            .iter()
            .map(|(step_id, path)| SuspendedStep {
                step_id: step_id.clone(),
                path: path.clone(),
                output: state
                    .step_results
                    .get(step_id)
                    .and_then(|result| result.output().cloned())
                    .unwrap_or(Value::Null),
            })
            .collect();
        suspended.sort_by(|a, b| a.step_id.cmp(&b.step_id));
        WorkflowResult::Suspended {
            suspended,
            steps: state.step_results,
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
