//! Request Intake
//!
//! Hosts that receive input asynchronously (a wake word, a button, a remote
//! push) enqueue it here with a priority. The intake loop runs one dialog at a
//! time through the [`Conductor`], always taking the most urgent input next.

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::conductor::{Conductor, DialogInput, DialogOutcome};
use crate::queue::PriorityQueue;

/// Priority for inputs that must run before anything else queued
pub const URGENT: i32 = 0;
/// Priority for ordinary inputs
pub const NORMAL: i32 = 10;

#[derive(Debug)]
struct QueuedDialog {
    user_id: String,
    input: DialogInput,
}

/// Priority-ordered queue of dialogs waiting to run
#[derive(Debug, Default)]
pub struct RequestIntake {
    queue: Mutex<PriorityQueue<QueuedDialog>>,
    notify: Notify,
}

impl RequestIntake {
    /// Create an empty intake
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a dialog; lower `priority` numbers run first
    pub fn enqueue(&self, user_id: impl Into<String>, input: DialogInput, priority: i32) {
        let user_id = user_id.into();
        tracing::debug!(user_id = %user_id, priority, "Queued dialog input");
        self.queue.lock().enqueue(QueuedDialog { user_id, input }, priority);
        self.notify.notify_one();
    }

    /// Number of queued dialogs
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Drop every queued dialog
    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    /// Run queued dialogs one after another until `shutdown` fires
    ///
    /// A dialog running when `shutdown` fires is stopped and allowed to wind
    /// down. Returns the number of dialogs run.
    pub async fn run(&self, conductor: &Conductor, shutdown: &CancellationToken) -> usize {
        let mut dialogs = 0;
        tracing::info!("Request intake started");

        loop {
            let next = loop {
                let notified = self.notify.notified();
                let item = self.queue.lock().dequeue();
                if let Some(item) = item {
                    break item;
                }
                tokio::select! {
                    () = shutdown.cancelled() => {
                        tracing::info!(dialogs, "Request intake stopped");
                        return dialogs;
                    }
                    () = notified => {}
                }
            };

            let dialog = conductor.start_dialog(&next.user_id, next.input);
            tokio::pin!(dialog);
            let outcome = tokio::select! {
                outcome = &mut dialog => outcome,
                () = shutdown.cancelled() => {
                    conductor.stop_dialog(false, false).await;
                    dialog.await
                }
            };
            dialogs += 1;

            if let DialogOutcome::Failed(e) = &outcome {
                tracing::warn!(user_id = %next.user_id, error = %e, "Queued dialog failed");
            }
            if shutdown.is_cancelled() {
                tracing::info!(dialogs, "Request intake stopped");
                return dialogs;
            }
        }
    }
}
