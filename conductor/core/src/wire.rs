//! Wire Format for Remote Skills
//!
//! JSON envelopes exchanged with skills and intent extractors that run in
//! another process:
//!
//! ```text
//!   POST {base}/preprocess   SkillRequestEnvelope  ──►  SkillResponseEnvelope
//!   POST {base}/process      SkillRequestEnvelope  ──►  SkillResponseEnvelope
//!   POST {intent endpoint}   IntentRequestEnvelope ──►  IntentExtractionResult
//! ```
//!
//! Field names are PascalCase and must not change.

use serde::{Deserialize, Serialize};

use crate::error::DialogError;
use crate::models::{Request, Response, State};

/// Request sent to a remote skill
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SkillRequestEnvelope {
    /// The request being handled
    pub request: Request,
    /// The user's state at the time of the call
    pub state: State,
    /// Set on pre-process calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_process: Option<bool>,
}

/// Error reported by a remote skill
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
}

/// Reply from a remote skill
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SkillResponseEnvelope {
    /// The request, possibly annotated by the skill
    pub request: Request,
    /// The state after the skill ran
    pub state: State,
    /// The skill's response (absent when a pre-process call has no filler)
    #[serde(default)]
    pub response: Option<Response>,
    /// Failure, if any
    #[serde(default)]
    pub error: Option<RemoteError>,
}

impl SkillResponseEnvelope {
    /// Split into state and response, turning an error envelope into an error
    ///
    /// # Errors
    ///
    /// Returns [`DialogError::Remote`] when the envelope carries an error.
    pub fn into_parts(self) -> Result<(State, Option<Response>), DialogError> {
        if let Some(error) = self.error {
            return Err(DialogError::Remote {
                code: error.code,
                message: error.message,
            });
        }
        Ok((self.state, self.response))
    }
}

/// Request sent to a remote intent extractor
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IntentRequestEnvelope {
    /// The request to classify
    pub request: Request,
    /// The user's state (for topic-aware extraction)
    pub state: State,
}
