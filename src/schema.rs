//! Payload schema validation seam.
//!
//! The engine treats schema validation as an external collaborator: any
//! library able to parse/validate typed JSON payloads fits. This module
//! wraps the `jsonschema` crate behind a small [`Schema`] type so the rest
//! of the crate deals in one compiled, cheaply-cloneable handle.

use jsonschema::JSONSchema;
use miette::Diagnostic;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by schema compilation or payload validation.
#[derive(Debug, Error, Diagnostic)]
pub enum SchemaError {
    /// The schema document itself is not a valid JSON Schema.
    #[error("schema failed to compile: {detail}")]
    #[diagnostic(
        code(loomflow::schema::compile),
        help("Check the schema document against the JSON Schema specification.")
    )]
    Compile { detail: String },

    /// A payload did not satisfy the schema.
    #[error("{subject} failed schema validation: {detail}")]
    #[diagnostic(
        code(loomflow::schema::validation),
        help("Inspect the offending payload for the fields listed in the detail.")
    )]
    Validation { subject: String, detail: String },
}

/// A compiled JSON schema, cloneable and shareable across steps.
///
/// Compilation happens once (at step build or workflow commit time); each
/// [`validate`](Self::validate) call reuses the compiled form.
///
/// # Examples
///
/// ```rust
/// use loomflow::schema::Schema;
/// use serde_json::json;
///
/// let schema = Schema::compile(json!({
///     "type": "object",
///     "properties": {"a": {"type": "number"}},
///     "required": ["a"],
/// }))
/// .unwrap();
///
/// assert!(schema.validate("test payload", &json!({"a": 2})).is_ok());
/// assert!(schema.validate("test payload", &json!({"a": "two"})).is_err());
/// ```
#[derive(Clone)]
pub struct Schema {
    raw: Arc<Value>,
    compiled: Arc<JSONSchema>,
}

impl Schema {
    /// Compile a JSON Schema document.
    pub fn compile(raw: Value) -> Result<Self, SchemaError> {
        let compiled = JSONSchema::compile(&raw).map_err(|err| SchemaError::Compile {
            detail: err.to_string(),
        })?;
        Ok(Self {
            raw: Arc::new(raw),
            compiled: Arc::new(compiled),
        })
    }

    /// Validate a payload, collecting every violation into one error.
    ///
    /// `subject` names the payload in the error message (e.g. `"input for
    /// step 'add'"`) so failures are attributable without extra context.
    pub fn validate(&self, subject: &str, instance: &Value) -> Result<(), SchemaError> {
        if let Err(errors) = self.compiled.validate(instance) {
            let detail = errors
                .map(|err| err.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SchemaError::Validation {
                subject: subject.to_string(),
                detail,
            });
        }
        Ok(())
    }

    /// Fast boolean check without error details.
    #[must_use]
    pub fn is_valid(&self, instance: &Value) -> bool {
        self.compiled.is_valid(instance)
    }

    /// The original schema document.
    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema").field("raw", &self.raw).finish()
    }
}
