//! Generation Stream Handle
//!
//! A skill that generates content incrementally hands the turn a
//! [`GenerationStream`]. The producer side appends text through a
//! [`StreamWriter`]; the streaming pipeline reads the shared buffer past its own
//! offset and awaits completion.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::backend::StreamingToken;
use crate::context::TurnContext;
use crate::error::{DialogError, DialogResult};

#[derive(Debug, Default)]
struct StreamBuffer {
    text: Mutex<String>,
    error: Mutex<Option<String>>,
}

/// Producer half of a generation stream
///
/// Dropping the writer marks the stream done, so a producer that bails out
/// early never leaves the reader waiting.
#[derive(Debug)]
pub struct StreamWriter {
    shared: Arc<StreamBuffer>,
    done: watch::Sender<bool>,
}

impl StreamWriter {
    /// Append generated text
    pub fn push(&self, chunk: &str) {
        if chunk.is_empty() || *self.done.borrow() {
            return;
        }
        self.shared.text.lock().push_str(chunk);
    }

    /// Number of bytes written so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.text.lock().len()
    }

    /// Whether nothing was written yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a generation failure; the stream completes with an error
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(error = %message, "Generation stream failed");
        *self.shared.error.lock() = Some(message);
    }

    /// Mark the stream done
    pub fn finish(self) {
        drop(self);
    }

    /// Whether every reader is gone
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.done.is_closed()
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        self.done.send_replace(true);
    }
}

/// Reader half of a generation stream
#[derive(Clone, Debug)]
pub struct GenerationStream {
    shared: Arc<StreamBuffer>,
    done: watch::Receiver<bool>,
}

impl GenerationStream {
    /// Create a connected writer/stream pair
    #[must_use]
    pub fn channel() -> (StreamWriter, Self) {
        let shared = Arc::new(StreamBuffer::default());
        let (tx, rx) = watch::channel(false);
        (
            StreamWriter {
                shared: Arc::clone(&shared),
                done: tx,
            },
            Self { shared, done: rx },
        )
    }

    /// A stream that is already complete
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let (writer, stream) = Self::channel();
        writer.push(text);
        writer.finish();
        stream
    }

    /// Pump backend tokens into a new stream until completion or cancellation
    ///
    /// `Complete` only contributes its message when no token arrived before it.
    #[must_use]
    pub fn from_tokens(mut rx: mpsc::Receiver<StreamingToken>, ctx: &TurnContext) -> Self {
        let (writer, stream) = Self::channel();
        let ctx = ctx.clone();

        tokio::spawn(async move {
            loop {
                let token = tokio::select! {
                    biased;
                    () = ctx.cancelled() => break,
                    token = rx.recv() => token,
                };
                match token {
                    Some(StreamingToken::Token(text)) => writer.push(&text),
                    Some(StreamingToken::Complete { message }) => {
                        if writer.is_empty() {
                            writer.push(&message);
                        }
                        break;
                    }
                    Some(StreamingToken::Error(e)) => {
                        writer.fail(e);
                        break;
                    }
                    None => break,
                }
            }
            writer.finish();
        });

        stream
    }

    /// Whether the producer has finished
    #[must_use]
    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Total bytes written so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.text.lock().len()
    }

    /// Whether nothing was written yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text written past byte `offset`
    ///
    /// Offsets handed out by the pipeline always fall on char boundaries; an
    /// out-of-range offset yields an empty string.
    #[must_use]
    pub fn read_from(&self, offset: usize) -> String {
        let text = self.shared.text.lock();
        text.get(offset..).unwrap_or_default().to_string()
    }

    /// Full text written so far
    #[must_use]
    pub fn text(&self) -> String {
        self.shared.text.lock().clone()
    }

    /// Failure recorded by the producer
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.shared.error.lock().clone()
    }

    /// Wait for the producer to finish
    ///
    /// # Errors
    ///
    /// Returns [`DialogError::Stream`] when the producer recorded a failure.
    pub async fn wait(&self) -> DialogResult<()> {
        let mut done = self.done.clone();
        // The writer always publishes `true` before its sender drops.
        let _ = done.wait_for(|finished| *finished).await;
        match self.error() {
            Some(message) => Err(DialogError::Stream(message)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_writer_drop_marks_done() {
        let (writer, stream) = GenerationStream::channel();
        writer.push("Hello");
        assert!(!stream.is_done());

        drop(writer);
        assert!(stream.is_done());
        stream.wait().await.unwrap();
        assert_eq!(stream.text(), "Hello");
    }

    #[tokio::test]
    async fn test_read_from_offset() {
        let stream = GenerationStream::from_text("Hi there. Bye.");
        assert_eq!(stream.read_from(10), "Bye.");
        assert_eq!(stream.read_from(100), "");
    }

    #[tokio::test]
    async fn test_failure_surfaces_on_wait() {
        let (writer, stream) = GenerationStream::channel();
        writer.fail("model crashed");
        writer.finish();
        let err = stream.wait().await.unwrap_err();
        assert!(matches!(err, DialogError::Stream(m) if m == "model crashed"));
    }

    #[tokio::test]
    async fn test_from_tokens_pumps_until_complete() {
        let (tx, rx) = mpsc::channel(8);
        let stream = GenerationStream::from_tokens(rx, &TurnContext::new());

        tx.send(StreamingToken::Token("Hel".to_string())).await.unwrap();
        tx.send(StreamingToken::Token("lo.".to_string())).await.unwrap();
        tx.send(StreamingToken::Complete {
            message: "Hello.".to_string(),
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(1), stream.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stream.text(), "Hello.");
    }

    #[tokio::test]
    async fn test_from_tokens_uses_complete_message_when_no_tokens() {
        let (tx, rx) = mpsc::channel(8);
        let stream = GenerationStream::from_tokens(rx, &TurnContext::new());
        tx.send(StreamingToken::Complete {
            message: "All at once.".to_string(),
        })
        .await
        .unwrap();

        stream.wait().await.unwrap();
        assert_eq!(stream.text(), "All at once.");
    }

    #[tokio::test]
    async fn test_from_tokens_stops_on_cancel() {
        let (_tx, rx) = mpsc::channel::<StreamingToken>(8);
        let ctx = TurnContext::new();
        let stream = GenerationStream::from_tokens(rx, &ctx);

        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(1), stream.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(stream.is_done());
    }
}
