//! On-demand summary generation driving a [`StreamAccumulator`].

use futures::StreamExt;
use gf_client::{SummaryBackend, SummaryRequest, SummaryStreamEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    accumulator::{Phase, StreamAccumulator},
    error::{Error, Result},
    store::ChatStore,
};

/// Fallback shown when nothing more specific is known
const GENERIC_FAILURE: &str = "Failed to generate summary.";

/// Live view of the current (or last) summary generation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryState {
    pub reasoning_text: String,
    pub output_text: String,
    pub phase: Phase,
    pub is_generating: bool,
    pub error: Option<String>,
}

/// How a generation ended, when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryOutcome {
    Completed,
    Cancelled,
}

struct Generation {
    id: Uuid,
    cancel: CancellationToken,
}

/// Clears the active slot when `generate` is dropped before it finishes
struct ActiveGeneration<'a> {
    summarizer: &'a Summarizer,
    id: Uuid,
}

impl Drop for ActiveGeneration<'_> {
    fn drop(&mut self) {
        let mut active = self.summarizer.active.lock();
        if !active.as_ref().is_some_and(|g| g.id == self.id) {
            return;
        }
        if let Some(generation) = active.take() {
            tracing::debug!(generation = %generation.id, "Summary generation dropped");
            generation.cancel.cancel();
        }
        self.summarizer.state_tx.send_modify(|s| {
            s.is_generating = false;
            s.phase = Phase::Idle;
        });
    }
}

/// Runs one summary generation at a time and publishes its progress
pub struct Summarizer {
    backend: Arc<dyn SummaryBackend>,
    state_tx: watch::Sender<SummaryState>,
    active: Mutex<Option<Generation>>,
}

impl Summarizer {
    /// Create a summarizer over a streaming backend
    pub fn new(backend: Arc<dyn SummaryBackend>) -> Self {
        let (state_tx, _) = watch::channel(SummaryState::default());
        Self {
            backend,
            state_tx,
            active: Mutex::new(None),
        }
    }

    /// Subscribe to state updates
    pub fn subscribe(&self) -> watch::Receiver<SummaryState> {
        self.state_tx.subscribe()
    }

    /// Current state snapshot
    pub fn state(&self) -> SummaryState {
        self.state_tx.borrow().clone()
    }

    /// Whether a generation is in flight
    pub fn is_generating(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Cancel the in-flight generation, if any. Text buffers keep what they
    /// had; no error is recorded.
    pub fn cancel(&self) {
        let mut active = self.active.lock();
        if let Some(generation) = active.take() {
            tracing::info!(generation = %generation.id, "Summary generation cancelled");
            generation.cancel.cancel();
            self.state_tx.send_modify(|s| {
                s.is_generating = false;
                s.phase = Phase::Idle;
            });
        }
    }

    /// Generate a summary, publishing reasoning/output after every chunk.
    /// Any generation already running is cancelled first.
    pub async fn generate(&self, request: SummaryRequest) -> Result<SummaryOutcome> {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        {
            let mut active = self.active.lock();
            if let Some(previous) = active.replace(Generation {
                id,
                cancel: cancel.clone(),
            }) {
                tracing::debug!(
                    generation = %previous.id,
                    "Superseding running summary generation"
                );
                previous.cancel.cancel();
            }
            self.state_tx.send_replace(SummaryState {
                is_generating: true,
                ..Default::default()
            });
        }
        let _guard = ActiveGeneration { summarizer: self, id };
        tracing::info!(
            generation = %id,
            lines = request.messages.len(),
            "Starting summary generation"
        );

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(SummaryOutcome::Cancelled),
            opened = self.backend.stream_summary(&request) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                let e = Error::from(e);
                tracing::warn!(generation = %id, "Summary request failed: {}", e);
                self.fail(id, &cancel, describe_summary_error(&e));
                return Err(e);
            }
        };

        let mut accumulator = StreamAccumulator::new();
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(SummaryOutcome::Cancelled),
                event = stream.next() => event,
            };

            match event {
                Some(Ok(SummaryStreamEvent::Chunk { content })) => {
                    accumulator.push(&content);
                    let published = self.publish(&cancel, |s| {
                        s.reasoning_text = accumulator.reasoning_text().to_string();
                        s.output_text = accumulator.output_text().to_string();
                        s.phase = accumulator.phase();
                    });
                    if !published {
                        return Ok(SummaryOutcome::Cancelled);
                    }
                }
                Some(Ok(SummaryStreamEvent::Error { message })) => {
                    tracing::warn!(generation = %id, "Summary stream error: {}", message);
                    let e = Error::Summary(message);
                    self.fail(id, &cancel, describe_summary_error(&e));
                    return Err(e);
                }
                Some(Ok(SummaryStreamEvent::Done { output })) => {
                    accumulator.finish(output);
                    return Ok(self.complete(id, &cancel, &accumulator));
                }
                Some(Err(e)) => {
                    let e = Error::from(e);
                    tracing::warn!(generation = %id, "Summary stream broke off: {}", e);
                    self.fail(id, &cancel, describe_summary_error(&e));
                    return Err(e);
                }
                None => {
                    tracing::debug!(generation = %id, "Summary stream ended without done event");
                    accumulator.finish(None);
                    return Ok(self.complete(id, &cancel, &accumulator));
                }
            }
        }
    }

    /// Apply `update` unless the generation was cancelled. The check and the
    /// send happen under the same lock `cancel` takes.
    fn publish(&self, cancel: &CancellationToken, update: impl FnOnce(&mut SummaryState)) -> bool {
        let _active = self.active.lock();
        if cancel.is_cancelled() {
            return false;
        }
        self.state_tx.send_modify(update);
        true
    }

    fn finish_generation(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
        update: impl FnOnce(&mut SummaryState),
    ) -> bool {
        let mut active = self.active.lock();
        if cancel.is_cancelled() {
            return false;
        }
        if active.as_ref().is_some_and(|g| g.id == id) {
            *active = None;
        }
        self.state_tx.send_modify(|s| {
            update(s);
            s.is_generating = false;
            s.phase = Phase::Idle;
        });
        true
    }

    fn complete(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
        accumulator: &StreamAccumulator,
    ) -> SummaryOutcome {
        let finished = self.finish_generation(id, cancel, |s| {
            s.reasoning_text = accumulator.reasoning_text().to_string();
            s.output_text = accumulator.output_text().to_string();
        });
        if finished {
            tracing::info!(generation = %id, "Summary generation complete");
            SummaryOutcome::Completed
        } else {
            SummaryOutcome::Cancelled
        }
    }

    fn fail(&self, id: Uuid, cancel: &CancellationToken, message: String) {
        self.finish_generation(id, cancel, |s| s.error = Some(message));
    }
}

/// User-facing message for a summary failure
pub fn describe_summary_error(error: &Error) -> String {
    match error {
        Error::Client(gf_client::Error::NotConfigured(_)) => {
            "Summary endpoint is not configured. Set `summary_url` in settings.".to_string()
        }
        Error::Client(e) if e.is_unauthorized() => {
            "Authentication failed. Please sign in again.".to_string()
        }
        Error::Client(gf_client::Error::Api { message, .. }) | Error::Summary(message)
            if !message.trim().is_empty() =>
        {
            message.clone()
        }
        _ => GENERIC_FAILURE.to_string(),
    }
}

/// Render the last `max` messages as `"<sender>: <content>"` lines for a
/// summary request. Blank messages are skipped.
pub fn summary_lines(store: &ChatStore, max: usize) -> Vec<String> {
    let lines: Vec<String> = store
        .messages
        .iter()
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| format!("{}: {}", store.sender_name(&m.sender_id), m.content.trim()))
        .collect();
    let skip = lines.len().saturating_sub(max);
    lines.into_iter().skip(skip).collect()
}
