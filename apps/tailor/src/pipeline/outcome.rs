use std::fmt::Display;

use tracing::warn;

/// Result of a sub-step that may degrade instead of failing the stage.
#[derive(Debug, Clone, PartialEq)]
pub enum BestEffort<T> {
    Ok(T),
    Degraded { value: T, warning: String },
}

impl<T> BestEffort<T> {
    /// Keeps `Ok`, replaces an error with `fallback` and records why.
    pub fn or_degrade<E: Display>(
        result: Result<T, E>,
        what: &str,
        fallback: impl FnOnce() -> T,
    ) -> Self {
        match result {
            Ok(value) => BestEffort::Ok(value),
            Err(e) => BestEffort::Degraded {
                value: fallback(),
                warning: format!("{what}: {e}"),
            },
        }
    }

    pub fn warning(&self) -> Option<&str> {
        match self {
            BestEffort::Ok(_) => None,
            BestEffort::Degraded { warning, .. } => Some(warning),
        }
    }

    /// Unwraps the value, logging a degradation at `warn` and pushing it onto
    /// `warnings`.
    pub fn settle(self, job_id: &str, warnings: &mut Vec<String>) -> T {
        match self {
            BestEffort::Ok(value) => value,
            BestEffort::Degraded { value, warning } => {
                warn!(job_id, "{warning} (continuing)");
                warnings.push(warning);
                value
            }
        }
    }
}
