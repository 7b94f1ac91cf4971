//! Performable Units and the Performer Capability
//!
//! A [`PerformableUnit`] bundles what the agent does in one atomic step: a
//! spoken line, a facial expression, and any number of body animations.
//! Rendering and speech synthesis live outside this crate behind the
//! [`Performer`] trait; the core only decides *what* is performed and *when*.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::TurnContext;

/// A spoken line
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Voice {
    /// Text to speak (directive markup already stripped)
    pub text: String,
    /// Silence before speaking, in seconds
    #[serde(default)]
    pub pre_gap: f32,
    /// Silence after speaking, in seconds
    #[serde(default)]
    pub post_gap: f32,
}

impl Voice {
    /// Spoken line with no gaps
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            pre_gap: 0.0,
            post_gap: 0.0,
        }
    }
}

/// A facial expression
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Face {
    /// Expression name (e.g. "Joy", "Sorrow")
    pub name: String,
    /// How long to hold it, in seconds (0 = until replaced)
    #[serde(default)]
    pub duration: f32,
}

impl Face {
    /// Expression held until replaced
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            duration: 0.0,
        }
    }
}

/// A body animation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Animation {
    /// Animation name (e.g. "wave", "nod")
    pub name: String,
    /// Playback length, in seconds (0 = clip default)
    #[serde(default)]
    pub duration: f32,
}

impl Animation {
    /// Animation played at its clip length
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            duration: 0.0,
        }
    }
}

/// Voice, face and animation directives played as one step
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PerformableUnit {
    /// Spoken line
    #[serde(default)]
    pub voice: Option<Voice>,
    /// Facial expression
    #[serde(default)]
    pub face: Option<Face>,
    /// Body animations, started together
    #[serde(default)]
    pub animations: Vec<Animation>,
}

impl PerformableUnit {
    /// A unit that only speaks
    pub fn voice(text: impl Into<String>) -> Self {
        Self {
            voice: Some(Voice::new(text)),
            ..Default::default()
        }
    }

    /// Set the facial expression
    #[must_use]
    pub fn with_face(mut self, face: Face) -> Self {
        self.face = Some(face);
        self
    }

    /// Add an animation
    #[must_use]
    pub fn with_animation(mut self, animation: Animation) -> Self {
        self.animations.push(animation);
        self
    }

    /// Whether the unit would do nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.voice.as_ref().map_or(true, |v| v.text.trim().is_empty())
            && self.face.is_none()
            && self.animations.is_empty()
    }
}

/// Speech, face and animation output
///
/// Implemented by the host (TTS plus avatar renderer, a console printer, a
/// test recorder). `perform` resolves once the unit has fully played.
#[async_trait]
pub trait Performer: Send + Sync {
    /// Play one unit and wait until it finishes
    async fn perform(&self, unit: &PerformableUnit, ctx: &TurnContext) -> anyhow::Result<()>;

    /// Start synthesizing a line ahead of playback
    ///
    /// Called by the streaming pipeline as soon as a unit is parsed. Must not
    /// block; implementations spawn the work and cache the result.
    fn prefetch(&self, _voice: &Voice) {}

    /// Stop whatever is playing right now
    fn interrupt(&self) {}
}

/// Play `units` in order, stopping early when the turn is cancelled
pub async fn perform_all(
    performer: &dyn Performer,
    units: &[PerformableUnit],
    ctx: &TurnContext,
) -> anyhow::Result<()> {
    for unit in units {
        if ctx.is_cancelled() {
            break;
        }
        if unit.is_empty() {
            continue;
        }
        match ctx.run(performer.perform(unit, ctx)).await {
            Some(result) => result?,
            None => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        spoken: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Performer for Recorder {
        async fn perform(&self, unit: &PerformableUnit, _ctx: &TurnContext) -> anyhow::Result<()> {
            if let Some(voice) = &unit.voice {
                self.spoken.lock().push(voice.text.clone());
            }
            Ok(())
        }
    }

    #[test]
    fn test_empty_unit() {
        assert!(PerformableUnit::default().is_empty());
        assert!(PerformableUnit::voice("  ").is_empty());
        assert!(!PerformableUnit::voice("hi").is_empty());
        assert!(!PerformableUnit::default()
            .with_face(Face::new("Joy"))
            .is_empty());
    }

    #[tokio::test]
    async fn test_perform_all_skips_empty_units() {
        let recorder = Recorder::default();
        let units = vec![
            PerformableUnit::voice("one"),
            PerformableUnit::default(),
            PerformableUnit::voice("two"),
        ];
        perform_all(&recorder, &units, &TurnContext::new())
            .await
            .unwrap();
        assert_eq!(*recorder.spoken.lock(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_perform_all_stops_when_cancelled() {
        let recorder = Recorder::default();
        let ctx = TurnContext::new();
        ctx.cancel();
        perform_all(&recorder, &[PerformableUnit::voice("one")], &ctx)
            .await
            .unwrap();
        assert!(recorder.spoken.lock().is_empty());
    }
}
