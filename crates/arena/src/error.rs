use crate::rules::RulesError;

/// Errors returned by arena commands and collaborators.
///
/// Every rejection leaves state untouched and is returned only to the caller
/// that issued the command.
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    /// A command field is missing or malformed.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// The command is well formed but not allowed in the current state.
    #[error("invalid state: {reason}")]
    State { reason: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// The rules engine rejected the move or the stored position.
    #[error(transparent)]
    IllegalMove(#[from] RulesError),

    #[error("persistence error: {reason}")]
    Persistence {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("arena is shutting down")]
    ShuttingDown,
}

impl ArenaError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn state(reason: impl Into<String>) -> Self {
        Self::State {
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn persistence(reason: impl Into<String>) -> Self {
        Self::Persistence {
            reason: reason.into(),
            source: None,
        }
    }

    /// Whether the rejection was caused by the caller's input rather than the
    /// arena's own state or collaborators.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::State { .. }
                | Self::NotFound { .. }
                | Self::IllegalMove(_)
        )
    }
}

pub type Result<T, E = ArenaError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = ArenaError::not_found("match", "abc");
        assert_eq!(err.to_string(), "match abc not found");

        let err = ArenaError::state("match is not ongoing");
        assert_eq!(err.to_string(), "invalid state: match is not ongoing");

        let err = ArenaError::validation("missing field `userId`");
        assert_eq!(err.to_string(), "validation failed: missing field `userId`");
    }

    #[test]
    fn client_errors_are_classified() {
        assert!(ArenaError::validation("x").is_client_error());
        assert!(ArenaError::state("x").is_client_error());
        assert!(!ArenaError::persistence("disk").is_client_error());
        assert!(!ArenaError::ShuttingDown.is_client_error());
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ArenaError>();
    }
}
