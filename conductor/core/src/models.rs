//! Conversation Records
//!
//! Passive data carried through a turn: the [`Request`] that starts it, the
//! [`Response`] a skill produces, the per-user [`State`] holding the active
//! [`Topic`], and the [`User`] profile.
//!
//! All records serialize with PascalCase field names. Remote skills exchange
//! them inside the envelopes in [`crate::wire`], so the names are part of the
//! cross-process contract.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::performance::PerformableUnit;
use crate::streaming::GenerationStream;

/// Opaque JSON map used for payloads, entities and skill memory
pub type DataMap = HashMap<String, Value>;

// ============================================================================
// Priority
// ============================================================================

/// Ordered priority rank
///
/// Named levels are spaced apart so ranks between them stay representable.
/// A topic started by a `HIGHEST` intent is stored one rank below `HIGHEST`
/// (see [`Priority::demoted`]), which a later `HIGHEST` intent still beats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Lowest rank
    pub const LOWEST: Self = Self(0);
    /// Low rank
    pub const LOW: Self = Self(25);
    /// Default rank
    pub const NORMAL: Self = Self(50);
    /// High rank
    pub const HIGH: Self = Self(75);
    /// Highest rank, reserved for intents that must be able to take over any topic
    pub const HIGHEST: Self = Self(100);

    /// The rank a topic keeps after being started by an intent of this rank
    #[must_use]
    pub fn demoted(self) -> Self {
        if self == Self::HIGHEST {
            Self(Self::HIGHEST.0 - 1)
        } else {
            self
        }
    }

    /// Parse a level name ("lowest" ... "highest") or a numeric rank
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "lowest" => Some(Self::LOWEST),
            "low" => Some(Self::LOW),
            "normal" => Some(Self::NORMAL),
            "high" => Some(Self::HIGH),
            "highest" => Some(Self::HIGHEST),
            other => other.parse().ok().map(Self),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::LOWEST => write!(f, "Lowest"),
            Self::LOW => write!(f, "Low"),
            Self::NORMAL => write!(f, "Normal"),
            Self::HIGH => write!(f, "High"),
            Self::HIGHEST => write!(f, "Highest"),
            Self(rank) => write!(f, "{rank}"),
        }
    }
}

// ============================================================================
// Request
// ============================================================================

/// Declared modality of a request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    /// No request (the conversation should end)
    None,
    /// Spoken input
    #[default]
    Voice,
    /// Camera capture
    Camera,
    /// QR code scan
    QrCode,
    /// Typed text
    Text,
}

impl RequestType {
    /// Parse a modality name
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Some(Self::None),
            "voice" => Some(Self::Voice),
            "camera" => Some(Self::Camera),
            "qr" | "qrcode" => Some(Self::QrCode),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

/// Extracted user intent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Intent {
    /// Topic name of the skill that should handle it
    pub name: String,
    /// Rank used to decide whether it may take over the active topic
    #[serde(default)]
    pub priority: Priority,
    /// Answer without taking over the topic
    #[serde(default)]
    pub is_adhoc: bool,
}

impl Intent {
    /// Create a normal-priority, non-adhoc intent
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: Priority::NORMAL,
            is_adhoc: false,
        }
    }

    /// Set the priority
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Mark as adhoc
    #[must_use]
    pub fn adhoc(mut self) -> Self {
        self.is_adhoc = true;
        self
    }
}

/// Result of delegated intent extraction
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IntentExtractionResult {
    /// Extracted intent, if any
    #[serde(default)]
    pub intent: Option<Intent>,
    /// Extracted entities
    #[serde(default)]
    pub entities: DataMap,
}

impl IntentExtractionResult {
    /// Result carrying an intent and no entities
    #[must_use]
    pub fn intent(intent: Intent) -> Self {
        Self {
            intent: Some(intent),
            entities: DataMap::new(),
        }
    }
}

/// A user input for one turn
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Request {
    /// Unique request id
    pub id: String,
    /// Declared modality
    #[serde(rename = "Type")]
    pub request_type: RequestType,
    /// When the request was created
    pub created_at: DateTime<Utc>,
    /// User the request belongs to
    pub user_id: String,
    /// Recognized or typed text
    #[serde(default)]
    pub text: String,
    /// Opaque side-channel data (images, codes, provider metadata)
    #[serde(default)]
    pub payloads: DataMap,
    /// Intent, once extracted
    #[serde(default)]
    pub intent: Option<Intent>,
    /// Entities extracted alongside the intent
    #[serde(default)]
    pub entities: DataMap,
    /// Whether the user cancelled the request
    #[serde(default)]
    pub is_canceled: bool,
}

impl Request {
    /// Create a request with a fresh id
    pub fn new(request_type: RequestType, user_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request_type,
            created_at: Utc::now(),
            user_id: user_id.into(),
            text: String::new(),
            payloads: DataMap::new(),
            intent: None,
            entities: DataMap::new(),
            is_canceled: false,
        }
    }

    /// Create a text-carrying request of the given modality
    pub fn with_text(
        request_type: RequestType,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let mut request = Self::new(request_type, user_id);
        request.text = text.into();
        request
    }

    /// Attach an intent
    #[must_use]
    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }

    /// Whether the request carries no usable input
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.payloads.is_empty()
    }

    /// Whether the request's intent is adhoc
    #[must_use]
    pub fn is_adhoc(&self) -> bool {
        self.intent.as_ref().is_some_and(|i| i.is_adhoc)
    }
}

// ============================================================================
// Response
// ============================================================================

/// What a skill answers with
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    /// Unique response id
    pub id: String,
    /// Request this answers
    pub request_id: String,
    /// When the response was created
    pub created_at: DateTime<Utc>,
    /// Units to perform, in order
    #[serde(default)]
    pub units: Vec<PerformableUnit>,
    /// Whether the active topic ends with this response
    #[serde(default = "default_true")]
    pub end_topic: bool,
    /// Whether the whole conversation ends with this response
    #[serde(default)]
    pub end_conversation: bool,
    /// Modality to listen for on the next turn
    #[serde(default)]
    pub next_turn_request_type: RequestType,
    /// Topic name of the skill that produced this response
    #[serde(default)]
    pub skill_name: String,
    /// Opaque skill output
    #[serde(default)]
    pub payloads: DataMap,
    /// In-flight generated content, drained by the streaming pipeline
    #[serde(skip)]
    pub stream: Option<GenerationStream>,
}

fn default_true() -> bool {
    true
}

impl Response {
    /// Create an empty response for `request_id`
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            created_at: Utc::now(),
            units: Vec::new(),
            end_topic: true,
            end_conversation: false,
            next_turn_request_type: RequestType::Voice,
            skill_name: String::new(),
            payloads: DataMap::new(),
            stream: None,
        }
    }

    /// Create a response answering `request`
    #[must_use]
    pub fn for_request(request: &Request) -> Self {
        Self::new(request.id.clone())
    }

    /// Append a spoken line
    #[must_use]
    pub fn say(mut self, text: impl Into<String>) -> Self {
        self.units.push(PerformableUnit::voice(text));
        self
    }

    /// Append a unit
    #[must_use]
    pub fn with_unit(mut self, unit: PerformableUnit) -> Self {
        self.units.push(unit);
        self
    }

    /// Attach a generation stream
    #[must_use]
    pub fn with_stream(mut self, stream: GenerationStream) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Keep the topic open for another turn
    #[must_use]
    pub fn continue_topic(mut self, next: RequestType) -> Self {
        self.end_topic = false;
        self.next_turn_request_type = next;
        self
    }

    /// Spoken text of all units, joined by newlines
    #[must_use]
    pub fn spoken_text(&self) -> String {
        self.units
            .iter()
            .filter_map(|u| u.voice.as_ref().map(|v| v.text.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ============================================================================
// State
// ============================================================================

/// The currently owned conversation thread
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Topic {
    /// Skill topic name; empty when no topic is active
    #[serde(default)]
    pub name: String,
    /// Skill-defined progress marker
    #[serde(default)]
    pub status: String,
    /// Rank the topic holds against incoming intents
    #[serde(default)]
    pub priority: Priority,
    /// Whether the skill is handling the first turn of the topic
    #[serde(default)]
    pub is_first_turn: bool,
}

impl Topic {
    /// Whether a topic is active
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.name.is_empty()
    }
}

/// Per-user session memory
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct State {
    /// Owner of the state
    pub user_id: String,
    /// Active topic
    #[serde(default)]
    pub topic: Topic,
    /// Skill-private memory
    #[serde(default)]
    pub data: DataMap,
    /// Last time the state was saved
    pub updated_at: DateTime<Utc>,
}

impl State {
    /// Fresh state with no topic
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            topic: Topic::default(),
            data: DataMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Drop the topic and all skill memory
    pub fn clear(&mut self) {
        self.topic = Topic::default();
        self.data.clear();
    }

    /// Whether the state was last saved more than `timeout_secs` before `now`
    #[must_use]
    pub fn is_stale(&self, timeout_secs: u64, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.updated_at);
        age.num_seconds() > i64::try_from(timeout_secs).unwrap_or(i64::MAX)
    }

    /// Read a typed value from skill memory
    #[must_use]
    pub fn get_data<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Write a typed value into skill memory
    pub fn set_data<T: Serialize>(&mut self, key: impl Into<String>, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => {
                self.data.insert(key.into(), v);
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize state data"),
        }
    }
}

// ============================================================================
// User
// ============================================================================

/// Stable user identity and profile
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct User {
    /// Stable user id
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Name the agent calls the user by
    #[serde(default)]
    pub nickname: String,
    /// Free-form profile data
    #[serde(default)]
    pub data: DataMap,
}

impl User {
    /// New user with an empty profile
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            nickname: String::new(),
            data: DataMap::new(),
        }
    }
}
