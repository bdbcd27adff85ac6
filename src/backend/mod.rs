//! Narration backends: anything that turns one chunk of text into audible output.
//!
//! Two families are supported:
//! - [`speech::DirectSpeechBackend`] drives a callback-based speech facility
//!   that synthesizes and speaks in one step.
//! - [`generate::GenerateThenPlayBackend`] first generates an audio buffer,
//!   then decodes and plays it through an [`generate::AudioSink`].

pub mod generate;
pub mod generators;
#[cfg(feature = "audio")]
pub mod rodio_sink;
pub mod speech;
pub mod speech_command;
pub mod worker;

use crate::cancellation::CancellationToken;
use crate::error::NarrationError;
use crate::narration::state::{Chunk, VoiceSettings};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

/// Result of one backend invocation. Resolved exactly once per chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Completed,
    Aborted,
    Failed(NarrationError),
}

#[async_trait]
pub trait NarrationBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Activate the output device. Must be callable from a user gesture and
    /// is idempotent.
    fn ensure_active(&self) -> Result<(), NarrationError> {
        Ok(())
    }

    /// Checked once per session before the first chunk.
    fn check_ready(&self) -> Result<(), NarrationError> {
        Ok(())
    }

    fn check_voice(&self, _voice: &VoiceSettings) -> Result<(), NarrationError> {
        Ok(())
    }

    async fn synthesize_and_play(
        &self,
        chunk: &Chunk,
        voice: &VoiceSettings,
        ctx: &ChunkContext,
    ) -> ChunkOutcome;

    fn pause_output(&self) {}

    fn resume_output(&self) {}

    /// Force-stop any live output immediately.
    fn stop_output(&self) {}
}

/// Per-chunk handles passed from the controller into a backend.
#[derive(Clone)]
pub struct ChunkContext {
    pub token: CancellationToken,
    pub pause: PauseGate,
    output_started: Arc<dyn Fn() + Send + Sync>,
}

impl ChunkContext {
    pub fn new(
        token: CancellationToken,
        pause: PauseGate,
        output_started: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        Self {
            token,
            pause,
            output_started,
        }
    }

    /// Context with no controller attached.
    #[cfg(test)]
    pub(crate) fn detached(token: CancellationToken) -> Self {
        Self::new(token, PauseGate::new(), Arc::new(|| {}))
    }

    /// Tell the controller audible output has begun for this chunk.
    pub fn output_started(&self) {
        (self.output_started)();
    }

    pub(crate) fn output_started_fn(&self) -> Arc<dyn Fn() + Send + Sync> {
        Arc::clone(&self.output_started)
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Pause flag with wake-up on change.
#[derive(Clone, Debug)]
pub struct PauseGate {
    paused: Arc<watch::Sender<bool>>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            paused: Arc::new(paused),
        }
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Suspend while paused. Returns `AbortedByUser` if `token` fires first.
    pub async fn wait_until_resumed(&self, token: &CancellationToken) -> Result<(), NarrationError> {
        let mut rx = self.paused.subscribe();
        loop {
            token.check_cancelled("pause-wait")?;
            if !*rx.borrow_and_update() {
                return Ok(());
            }
            tracing::debug!("Output held while paused");
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(NarrationError::AbortedByUser),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn pause_gate_passes_when_not_paused() {
        let gate = PauseGate::new();
        let token = CancellationToken::new();
        assert_eq!(gate.wait_until_resumed(&token).await, Ok(()));
    }

    #[tokio::test]
    async fn pause_gate_blocks_until_resume() {
        let gate = PauseGate::new();
        gate.pause();
        let token = CancellationToken::new();
        let waiter = {
            let gate = gate.clone();
            let token = token.clone();
            tokio::spawn(async move { gate.wait_until_resumed(&token).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        gate.resume();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("resumed")
            .expect("task");
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn pause_gate_releases_on_cancel() {
        let gate = PauseGate::new();
        gate.pause();
        let token = CancellationToken::new();
        let waiter = {
            let gate = gate.clone();
            let token = token.clone();
            tokio::spawn(async move { gate.wait_until_resumed(&token).await })
        };
        tokio::task::yield_now().await;
        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("released")
            .expect("task");
        assert_eq!(result, Err(NarrationError::AbortedByUser));
    }
}
