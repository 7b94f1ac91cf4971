//! Dialog Errors
//!
//! Error taxonomy for a turn. Cancellation is deliberately absent: a
//! superseded or stopped turn returns early with no value instead of failing.
//! Everything here is fatal for the turn and is converted into the `Error`
//! status by the [`Conductor`](crate::conductor::Conductor).

use thiserror::Error;

/// Errors raised while running a dialog turn
#[derive(Debug, Error)]
pub enum DialogError {
    /// Neither the intent nor the active topic maps to a registered skill
    #[error("No skill resolved for the request (intent: {intent:?}, topic: {topic:?})")]
    NoSkillResolved {
        /// Intent name carried by the request, if any
        intent: Option<String>,
        /// Active topic name, if any
        topic: Option<String>,
    },

    /// The user record could not be loaded
    #[error("Failed to load user {user_id}: {source}")]
    UserLoad {
        /// User that was requested
        user_id: String,
        /// Underlying store error
        source: anyhow::Error,
    },

    /// A user or state store operation failed
    #[error("Store operation '{operation}' failed: {source}")]
    Store {
        /// Operation name (e.g. `state.save`)
        operation: &'static str,
        /// Underlying store error
        source: anyhow::Error,
    },

    /// Intent extraction collaborator failed
    #[error("Intent extraction failed: {0}")]
    IntentExtraction(#[source] anyhow::Error),

    /// A skill phase failed
    #[error("Skill '{skill}' failed during {phase}: {source}")]
    Skill {
        /// Topic name of the failing skill
        skill: String,
        /// Lifecycle phase that failed
        phase: &'static str,
        /// Underlying error
        source: anyhow::Error,
    },

    /// No provider registered for the requested modality, or it failed
    #[error("Request provider error: {0}")]
    RequestProvider(String),

    /// The generation stream reported a failure
    #[error("Generation stream failed: {0}")]
    Stream(String),

    /// The performer failed while playing a unit
    #[error("Performance failed: {0}")]
    Performance(#[source] anyhow::Error),

    /// A remote skill or router returned an error envelope
    #[error("Remote error {code}: {message}")]
    Remote {
        /// Remote error code
        code: i32,
        /// Remote error message
        message: String,
    },

    /// A dialog hook failed
    #[error("Hook '{hook}' failed: {source}")]
    Hook {
        /// Hook name
        hook: &'static str,
        /// Underlying error
        source: anyhow::Error,
    },

    /// Skill registration was rejected
    #[error("Skill registration failed: {0}")]
    Registry(String),
}

impl DialogError {
    /// Wrap a skill failure
    pub fn skill(skill: &str, phase: &'static str, source: anyhow::Error) -> Self {
        Self::Skill {
            skill: skill.to_string(),
            phase,
            source,
        }
    }

    /// Wrap a store failure
    pub fn store(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Store { operation, source }
    }

    /// Whether this error means no handler was available for the request
    #[must_use]
    pub fn is_resolution_failure(&self) -> bool {
        matches!(self, Self::NoSkillResolved { .. } | Self::UserLoad { .. })
    }
}

/// Result alias for dialog operations
pub type DialogResult<T> = Result<T, DialogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_skill_message_names_topic_and_intent() {
        let err = DialogError::NoSkillResolved {
            intent: Some("weather".to_string()),
            topic: None,
        };
        let text = err.to_string();
        assert!(text.contains("weather"));
        assert!(err.is_resolution_failure());
    }

    #[test]
    fn test_skill_error_keeps_phase() {
        let err = DialogError::skill("chat", "process", anyhow::anyhow!("boom"));
        assert_eq!(err.to_string(), "Skill 'chat' failed during process: boom");
        assert!(!err.is_resolution_failure());
    }
}
