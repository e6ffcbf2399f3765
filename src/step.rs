//! Step definition: the immutable description of one unit of work.
//!
//! A [`Step`] couples a stable id with typed I/O (input/output schemas,
//! optional resume/suspend schemas) and an async execute handler. Steps are
//! created by construction and never mutated; composing them into a flow is
//! the builder's job (see [`crate::flow`]).
//!
//! # Suspension
//!
//! Execute returns a tagged [`StepOutcome`] rather than smuggling a
//! framework sentinel through the error channel: `Complete(output)` for
//! normal completion, `Suspend(payload)` to halt the run awaiting external
//! input. [`StepContext::suspend`](crate::context::StepContext::suspend)
//! builds the latter so a step terminates by returning it.
//!
//! # Examples
//!
//! ```rust
//! use loomflow::step::{Step, StepOutcome};
//! use serde_json::json;
//!
//! let add = Step::builder("add")
//!     .description("adds two numbers")
//!     .input_schema(json!({
//!         "type": "object",
//!         "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
//!         "required": ["a", "b"],
//!     }))
//!     .output_schema(json!({"type": "number"}))
//!     .handler(|ctx| async move {
//!         let a = ctx.input_data["a"].as_f64().unwrap_or_default();
//!         let b = ctx.input_data["b"].as_f64().unwrap_or_default();
//!         Ok(StepOutcome::Complete(json!(a + b)))
//!     })
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(add.id(), "add");
//! ```

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::context::StepContext;
use crate::flow::BuildError;
use crate::schema::{Schema, SchemaError};

/// Outcome of a single step invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    /// Normal completion with an output payload.
    Complete(Value),
    /// Voluntary halt; the payload is surfaced to callers until resumed.
    Suspend(Value),
}

/// Fatal errors raised by a step's execute.
///
/// A returned `StepError` records the step as failed and short-circuits the
/// enclosing entry; the engine never retries.
#[derive(Debug, Error, Diagnostic)]
pub enum StepError {
    /// Free-form execution failure.
    #[error("step execution failed: {0}")]
    #[diagnostic(code(loomflow::step::execution))]
    Execution(String),

    /// Expected input data is missing from the context.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(loomflow::step::missing_input),
        help("Check that the previous entry produced the required data: {what}.")
    )]
    MissingInput { what: String },

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    #[diagnostic(code(loomflow::step::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Payload validation failure.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] SchemaError),
}

impl StepError {
    /// Shorthand for [`StepError::Execution`].
    pub fn message(message: impl Into<String>) -> Self {
        StepError::Execution(message.into())
    }
}

/// Async execute callback of a step.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, StepError>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> StepHandler for FnHandler<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StepOutcome, StepError>> + Send + 'static,
{
    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, StepError> {
        (self.f)(ctx).await
    }
}

/// Immutable description of one unit of work.
///
/// Cloning shares the compiled schemas and the handler.
#[derive(Clone)]
pub struct Step {
    id: String,
    description: Option<String>,
    input_schema: Option<Schema>,
    output_schema: Option<Schema>,
    resume_schema: Option<Schema>,
    suspend_schema: Option<Schema>,
    handler: Arc<dyn StepHandler>,
}

impl Step {
    /// Start building a step with the given id (stable within a workflow).
    #[must_use]
    pub fn builder(id: impl Into<String>) -> StepBuilder {
        StepBuilder {
            id: id.into(),
            description: None,
            input_schema: None,
            output_schema: None,
            resume_schema: None,
            suspend_schema: None,
            handler: None,
        }
    }

    pub(crate) fn from_parts(
        id: String,
        description: Option<String>,
        handler: Arc<dyn StepHandler>,
    ) -> Self {
        Self {
            id,
            description,
            input_schema: None,
            output_schema: None,
            resume_schema: None,
            suspend_schema: None,
            handler,
        }
    }

    pub(crate) fn with_raw_schemas(
        mut self,
        input: Option<Value>,
        output: Option<Value>,
    ) -> Result<Self, SchemaError> {
        self.input_schema = input.map(Schema::compile).transpose()?;
        self.output_schema = output.map(Schema::compile).transpose()?;
        Ok(self)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn input_schema(&self) -> Option<&Schema> {
        self.input_schema.as_ref()
    }

    #[must_use]
    pub fn output_schema(&self) -> Option<&Schema> {
        self.output_schema.as_ref()
    }

    #[must_use]
    pub fn resume_schema(&self) -> Option<&Schema> {
        self.resume_schema.as_ref()
    }

    #[must_use]
    pub fn suspend_schema(&self) -> Option<&Schema> {
        self.suspend_schema.as_ref()
    }

    /// Invoke the step's execute handler.
    pub async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, StepError> {
        self.handler.execute(ctx).await
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for [`Step`].
///
/// Schemas are accepted as raw JSON Schema documents and compiled at
/// [`build`](Self::build); a handler is mandatory.
pub struct StepBuilder {
    id: String,
    description: Option<String>,
    input_schema: Option<Value>,
    output_schema: Option<Value>,
    resume_schema: Option<Value>,
    suspend_schema: Option<Value>,
    handler: Option<Arc<dyn StepHandler>>,
}

impl StepBuilder {
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Schema validated against the step's input before execute.
    #[must_use]
    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Schema validated against the step's output after execute.
    #[must_use]
    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Schema validated against the resume payload when this step is the
    /// target of a resume call.
    #[must_use]
    pub fn resume_schema(mut self, schema: Value) -> Self {
        self.resume_schema = Some(schema);
        self
    }

    /// Schema validated against the payload passed to `suspend`.
    #[must_use]
    pub fn suspend_schema(mut self, schema: Value) -> Self {
        self.suspend_schema = Some(schema);
        self
    }

    /// Provide the execute callback as an async closure.
    #[must_use]
    pub fn handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepOutcome, StepError>> + Send + 'static,
    {
        self.handler = Some(Arc::new(FnHandler { f }));
        self
    }

    /// Provide a pre-built handler implementation.
    #[must_use]
    pub fn handler_arc(mut self, handler: Arc<dyn StepHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Compile schemas and finish the step.
    pub fn build(self) -> Result<Step, BuildError> {
        let handler = self.handler.ok_or(BuildError::MissingHandler {
            step_id: self.id.clone(),
        })?;
        Ok(Step {
            id: self.id,
            description: self.description,
            input_schema: self.input_schema.map(Schema::compile).transpose()?,
            output_schema: self.output_schema.map(Schema::compile).transpose()?,
            resume_schema: self.resume_schema.map(Schema::compile).transpose()?,
            suspend_schema: self.suspend_schema.map(Schema::compile).transpose()?,
            handler,
        })
    }
}
