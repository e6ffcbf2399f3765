//! Identifier generation for runs.

use uuid::Uuid;

/// Generate a fresh run id (v4 UUID).
#[must_use]
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}
