use thiserror::Error;
use uuid::Uuid;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Campaign {0} not found")]
    CampaignNotFound(Uuid),

    #[error("Drip campaign {0} not found")]
    DripCampaignNotFound(Uuid),

    #[error("Journey {0} not found")]
    JourneyNotFound(Uuid),

    #[error("A non-terminal journey already exists for customer {customer_id} in sequence {sequence_id}")]
    DuplicateJourney {
        sequence_id: Uuid,
        customer_id: String,
    },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Experiment {0} not found")]
    ExperimentNotFound(Uuid),

    #[error("Dispatch failed: {0}")]
    DispatchFailure(String),

    #[error("Audience resolution failed: {0}")]
    AudienceResolutionFailure(String),

    #[error("Campaign validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    /// Transient errors are retried by the scheduler; everything else
    /// surfaces to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::DispatchFailure(_) | EngineError::Store(_))
    }
}
