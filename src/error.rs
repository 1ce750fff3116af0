//! Error types for the rating pipeline
//!
//! Pipeline steps return the typed [`PipelineError`] so the orchestrator can
//! classify failures; service plumbing uses anyhow for consistent error
//! handling throughout the application.

use serde::{Deserialize, Serialize};

/// Result type alias for service-level code
pub type Result<T> = anyhow::Result<T>;

/// Result type for pipeline steps
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Failures a single pipeline invocation can run into
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("Malformed change event: {reason}")]
    MalformedEvent { reason: String },

    #[error("Player not found: {player_id}")]
    PlayerNotFound { player_id: String },

    #[error("Rating store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Concurrent write conflict on player: {player_id}")]
    WriteConflict { player_id: String },
}

impl PipelineError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        PipelineError::MalformedEvent {
            reason: reason.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        PipelineError::StoreUnavailable {
            message: message.into(),
        }
    }

    /// The taxonomy tag of this error
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::MalformedEvent { .. } => FailureKind::MalformedEvent,
            PipelineError::PlayerNotFound { .. } => FailureKind::PlayerNotFound,
            PipelineError::StoreUnavailable { .. } => FailureKind::StoreUnavailable,
            PipelineError::WriteConflict { .. } => FailureKind::WriteConflict,
        }
    }

    /// Whether retrying the failed step may succeed
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

/// Serializable failure tag carried on dead letters and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MalformedEvent,
    PlayerNotFound,
    StoreUnavailable,
    WriteConflict,
}

impl FailureKind {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureKind::StoreUnavailable | FailureKind::WriteConflict
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::MalformedEvent => "malformed_event",
            FailureKind::PlayerNotFound => "player_not_found",
            FailureKind::StoreUnavailable => "store_unavailable",
            FailureKind::WriteConflict => "write_conflict",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised outside a pipeline invocation
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Dead letter publish failed: {message}")]
    DeadLetterPublishFailed { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(!PipelineError::malformed("bad").is_transient());
        assert!(!PipelineError::PlayerNotFound {
            player_id: "p".to_string()
        }
        .is_transient());
        assert!(PipelineError::unavailable("timeout").is_transient());
        assert!(PipelineError::WriteConflict {
            player_id: "p".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_failure_kind_serialization() {
        let json = serde_json::to_string(&FailureKind::WriteConflict).unwrap();
        assert_eq!(json, "\"write_conflict\"");
        assert_eq!(FailureKind::PlayerNotFound.to_string(), "player_not_found");
    }
}
