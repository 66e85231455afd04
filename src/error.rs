//! Error taxonomy for marketplace operations

use thiserror::Error;

/// Result type used by every core operation
pub type Result<T> = std::result::Result<T, MarketError>;

#[derive(Error, Debug)]
pub enum MarketError {
    /// Referenced bounty, application, milestone or notification does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Actor is not the publisher/receiver the operation requires
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Current status does not permit the requested transition
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("User already has an active application for this bounty")]
    AlreadyApplied,

    #[error("Publishers cannot apply to their own bounty")]
    SelfApplication,

    #[error("User already liked this bounty")]
    AlreadyLiked,

    #[error("User has not liked this bounty")]
    NotLiked,

    #[error("Bounty has no approved applications")]
    NoApprovedApplications,

    /// Malformed input (score out of range, empty title, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Storage failure not originating from SQLite
    #[error("Storage error: {0}")]
    Storage(String),
}

impl MarketError {
    /// Stable machine-readable code for the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::InvalidStateTransition(_) => "invalid_state_transition",
            Self::AlreadyApplied => "already_applied",
            Self::SelfApplication => "self_application",
            Self::AlreadyLiked => "already_liked",
            Self::NotLiked => "not_liked",
            Self::NoApprovedApplications => "no_approved_applications",
            Self::Validation(_) => "validation_error",
            Self::Database(_) | Self::Storage(_) => "storage_error",
        }
    }

    /// Domain precondition failures, as opposed to malformed input or storage faults
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::InvalidStateTransition(_)
                | Self::AlreadyApplied
                | Self::SelfApplication
                | Self::AlreadyLiked
                | Self::NotLiked
                | Self::NoApprovedApplications
        )
    }

    pub(crate) fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{} {}", entity, id))
    }
}
