use crate::task::TaskResult;

/// Structured errors surfaced by the engine.
///
/// Validation errors short-circuit before any child is spawned; `TaskFailure`
/// is only ever produced once a group's result list has been finalized.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0} not found")]
    PatternNoMatch(String),

    #[error("Invalid Option: {0}")]
    InvalidOption(String),

    #[error("Invalid Placeholder: {0}")]
    InvalidPlaceholder(String),

    #[error("No package.json found in the current directory")]
    ManifestMissing,

    #[error("{} of {} task(s) failed", .results.iter().filter(|r| r.code != Some(0)).count(), .results.len())]
    TaskFailure { results: Vec<TaskResult> },
}

impl EngineError {
    /// The result snapshot carried by a `TaskFailure`, if this is one.
    pub fn results(&self) -> Option<&[TaskResult]> {
        match self {
            EngineError::TaskFailure { results } => Some(results),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
