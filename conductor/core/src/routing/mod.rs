//! Topic Routing
//!
//! Resolves which skill answers a request:
//!
//! ```text
//!   Request ──► [IntentExtractor] ──► TopicRouter ──► Skill
//!                 (if no intent)        │
//!                                       └─► State.Topic (start / keep)
//! ```

mod intent;
mod router;

pub use intent::{IntentExtractor, KeywordIntentExtractor, NoIntentExtractor};
pub use router::{SkillRouter, TopicRouter};
