use thiserror::Error;

use crate::models::Component;

/// Errors surfaced by grading and result operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{component} score {score} is outside 0..={max} for student {uid}")]
    ScoreOutOfBounds {
        uid: String,
        component: Component,
        score: f64,
        max: f64,
    },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        EngineError::NotFound(what.to_string())
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_) | EngineError::ScoreOutOfBounds { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
