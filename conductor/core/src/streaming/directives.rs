//! Inline Performance Directives
//!
//! Generated text may embed bracketed directives that drive the avatar:
//!
//! ```text
//! [face:Joy] Nice to see you! [anim:wave]
//! [face:Sorrow:2.5] That is unfortunate.
//! ```
//!
//! The optional trailing number is a duration in seconds. Brackets that are
//! not directives are left in the spoken text untouched.

use std::collections::VecDeque;

use crate::performance::{Animation, Face, PerformableUnit, Voice};

/// A directive extracted from text
#[derive(Clone, Debug, PartialEq)]
pub enum Directive {
    /// Change the facial expression
    Face(Face),
    /// Play a body animation
    Animation(Animation),
}

/// Strips directives out of text and queues them
#[derive(Debug, Default)]
pub struct DirectiveParser {
    /// Directives extracted and not yet taken
    pub directives: VecDeque<Directive>,
}

impl DirectiveParser {
    /// Create an empty parser
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `text`, queue its directives, and return the remaining text
    pub fn parse(&mut self, text: &str) -> String {
        let mut result = String::with_capacity(text.len());
        let mut chars = text.chars();

        while let Some(c) = chars.next() {
            if c != '[' {
                result.push(c);
                continue;
            }

            let mut body = String::new();
            let mut closed = false;
            for inner in chars.by_ref() {
                if inner == ']' {
                    closed = true;
                    break;
                }
                body.push(inner);
            }

            match closed.then(|| Self::parse_directive(&body)).flatten() {
                Some(directive) => self.directives.push_back(directive),
                None => {
                    result.push('[');
                    result.push_str(&body);
                    if closed {
                        result.push(']');
                    }
                }
            }
        }

        result.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Parse `text` into one performable unit
    ///
    /// The last face directive wins; animations keep their order.
    pub fn parse_unit(&mut self, text: &str) -> PerformableUnit {
        let spoken = self.parse(text);
        let mut unit = PerformableUnit {
            voice: (!spoken.is_empty()).then(|| Voice::new(spoken)),
            ..Default::default()
        };
        while let Some(directive) = self.next_directive() {
            match directive {
                Directive::Face(face) => unit.face = Some(face),
                Directive::Animation(animation) => unit.animations.push(animation),
            }
        }
        unit
    }

    /// Take the oldest queued directive
    pub fn next_directive(&mut self) -> Option<Directive> {
        self.directives.pop_front()
    }

    /// Whether directives are queued
    #[must_use]
    pub fn has_directives(&self) -> bool {
        !self.directives.is_empty()
    }

    fn parse_directive(body: &str) -> Option<Directive> {
        let mut parts = body.trim().splitn(3, ':');
        let kind = parts.next()?.trim().to_lowercase();
        let name = parts.next()?.trim();
        if name.is_empty() {
            return None;
        }
        let duration = match parts.next() {
            Some(raw) => raw.trim().parse::<f32>().ok()?,
            None => 0.0,
        };

        match kind.as_str() {
            "face" => Some(Directive::Face(Face {
                name: name.to_string(),
                duration,
            })),
            "anim" | "animation" => Some(Directive::Animation(Animation {
                name: name.to_string(),
                duration,
            })),
            _ => None,
        }
    }
}
