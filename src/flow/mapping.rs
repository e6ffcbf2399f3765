//! Input mapping between flow entries.
//!
//! A `map` call appends a synthetic step whose sole job is to rebuild the
//! input for the next entry, either from a mapping function or from a
//! declarative record of sources. Mapping steps get deterministic ids
//! (`map@<entryIndex>`) so tests and snapshots are reproducible.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::context::StepContext;
use crate::step::{StepError, StepHandler, StepOutcome};

/// Functional mapping: receives the step context, returns the next input.
pub type MapFn = Arc<dyn Fn(&StepContext) -> Result<Value, StepError> + Send + Sync>;

/// One source in a declarative mapping record.
#[derive(Clone)]
pub enum MapSource {
    /// Resolve a dotted path in the named step's most recent output.
    Step { step: String, path: String },
    /// Resolve a dotted path in the run's initial input.
    InitData { path: String },
    /// Resolve a dotted path in the runtime context.
    RuntimeContext { path: String },
    /// A literal value.
    Value { value: Value },
    /// Evaluated as in functional form.
    Fn(MapFn),
}

impl fmt::Debug for MapSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapSource::Step { step, path } => {
                write!(f, "Step {{ step: {step:?}, path: {path:?} }}")
            }
            MapSource::InitData { path } => write!(f, "InitData {{ path: {path:?} }}"),
            MapSource::RuntimeContext { path } => {
                write!(f, "RuntimeContext {{ path: {path:?} }}")
            }
            MapSource::Value { value } => write!(f, "Value {{ value: {value} }}"),
            MapSource::Fn(_) => write!(f, "Fn(..)"),
        }
    }
}

/// Mapping configuration: a whole-input function or a keyed record.
#[derive(Clone)]
pub enum MapSpec {
    /// The mapping function's return value becomes the next input.
    Fn(MapFn),
    /// Each `(key, source)` pair becomes one field of the next input object.
    /// Order is preserved for deterministic evaluation.
    Record(Vec<(String, MapSource)>),
}

impl MapSpec {
    /// Convenience constructor for the functional form.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&StepContext) -> Result<Value, StepError> + Send + Sync + 'static,
    {
        MapSpec::Fn(Arc::new(f))
    }
}

impl fmt::Debug for MapSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapSpec::Fn(_) => write!(f, "MapSpec::Fn(..)"),
            MapSpec::Record(entries) => f.debug_tuple("MapSpec::Record").field(entries).finish(),
        }
    }
}

/// Descend dotted object fields; an empty path yields the whole value.
///
/// A missing intermediate is an error: mapping steps fail rather than
/// silently producing nulls.
pub(crate) fn resolve_path(value: &Value, path: &str) -> Result<Value, StepError> {
    if path.is_empty() {
        return Ok(value.clone());
    }
    let mut cursor = value;
    for segment in path.split('.') {
        cursor = cursor.get(segment).ok_or_else(|| {
            StepError::Execution(format!("path segment '{segment}' not found in '{path}'"))
        })?;
    }
    Ok(cursor.clone())
}

/// Handler backing the synthetic mapping step.
pub(crate) struct MappingHandler {
    spec: MapSpec,
}

impl MappingHandler {
    pub(crate) fn new(spec: MapSpec) -> Self {
        Self { spec }
    }

    fn resolve_source(ctx: &StepContext, key: &str, source: &MapSource) -> Result<Value, StepError> {
        match source {
            MapSource::Step { step, path } => {
                let output = ctx.get_step_result(step).ok_or_else(|| {
                    StepError::Execution(format!(
                        "mapping key '{key}' references step '{step}' with no recorded output"
                    ))
                })?;
                resolve_path(&output, path)
            }
            MapSource::InitData { path } => resolve_path(ctx.init_data(), path),
            MapSource::RuntimeContext { path } => {
                let (root, rest) = match path.split_once('.') {
                    Some((root, rest)) => (root, rest),
                    None => (path.as_str(), ""),
                };
                let value = ctx.runtime_context().get(root).ok_or_else(|| {
                    StepError::Execution(format!(
                        "mapping key '{key}' references runtime context key '{root}' which is unset"
                    ))
                })?;
                resolve_path(&value, rest)
            }
            MapSource::Value { value } => Ok(value.clone()),
            MapSource::Fn(f) => f(ctx),
        }
    }
}

#[async_trait]
impl StepHandler for MappingHandler {
    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, StepError> {
        match &self.spec {
            MapSpec::Fn(f) => Ok(StepOutcome::Complete(f(&ctx)?)),
            MapSpec::Record(entries) => {
                let mut object = Map::with_capacity(entries.len());
                for (key, source) in entries {
                    object.insert(key.clone(), Self::resolve_source(&ctx, key, source)?);
                }
                Ok(StepOutcome::Complete(Value::Object(object)))
            }
        }
    }
}
