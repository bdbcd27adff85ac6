//! Callback-driven speech: the facility synthesizes and speaks in one step and
//! reports progress through events.

use super::{ChunkContext, ChunkOutcome, NarrationBackend};
use crate::error::NarrationError;
use crate::narration::state::{Chunk, VoiceSettings};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub type UtteranceId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    Started,
    Ended,
    Error(SpeechErrorCode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechErrorCode {
    /// Speech was cut off by a cancel request.
    Interrupted,
    /// Speech was dropped before it started.
    Canceled,
    VoiceUnavailable(String),
    SynthesisFailed(String),
    /// The facility itself cannot run, e.g. its synthesizer is missing.
    Unavailable(String),
}

/// How an utterance ended. `Started` is progress, never an ending.
#[derive(Debug)]
enum SpeechEnd {
    Ended,
    Error(SpeechErrorCode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub voice: Option<String>,
    pub lang: String,
    /// Speaking rate multiplier, 1.0 is the facility's normal rate.
    pub rate: f32,
    /// Linear volume, 1.0 is unchanged.
    pub volume: f32,
}

impl Utterance {
    pub fn new(text: &str, voice: &VoiceSettings) -> Self {
        Self {
            text: text.to_string(),
            voice: voice.voice.clone(),
            lang: voice.lang.clone(),
            rate: voice.speed,
            volume: voice.volume,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceInfo {
    pub id: String,
    pub name: String,
    pub lang: String,
}

pub type SpeechCallback = Box<dyn FnMut(SpeechEvent) + Send>;

/// A platform speech facility.
///
/// `speak` queues one utterance and reports `Started` then exactly one of
/// `Ended` or `Error` through `on_event`, from any thread.
pub trait SpeechFacility: Send + Sync {
    fn speak(&self, utterance: Utterance, on_event: SpeechCallback) -> UtteranceId;

    /// Cancel everything queued or speaking.
    fn cancel(&self);

    /// Cancel one utterance; a no-op if it already finished.
    fn cancel_utterance(&self, id: UtteranceId);

    /// Returns false when the facility cannot pause in place.
    fn pause(&self) -> bool;

    fn resume(&self);

    fn voices(&self) -> Vec<VoiceInfo>;

    /// Check the facility can speak at all. May block.
    fn probe(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Adapter from a [`SpeechFacility`] to a narration backend.
pub struct DirectSpeechBackend<F> {
    facility: Arc<F>,
}

impl<F: SpeechFacility> DirectSpeechBackend<F> {
    pub fn new(facility: Arc<F>) -> Self {
        Self { facility }
    }

    fn classify(&self, end: SpeechEnd, ctx: &ChunkContext) -> ChunkOutcome {
        match end {
            SpeechEnd::Ended => ChunkOutcome::Completed,
            SpeechEnd::Error(SpeechErrorCode::Interrupted | SpeechErrorCode::Canceled)
                if ctx.is_cancelled() =>
            {
                ChunkOutcome::Aborted
            }
            SpeechEnd::Error(SpeechErrorCode::Interrupted) => {
                ChunkOutcome::Failed(NarrationError::playback("speech interrupted"))
            }
            SpeechEnd::Error(SpeechErrorCode::Canceled) => {
                ChunkOutcome::Failed(NarrationError::playback("speech canceled"))
            }
            SpeechEnd::Error(SpeechErrorCode::VoiceUnavailable(voice)) => {
                ChunkOutcome::Failed(NarrationError::UnsupportedLanguageOrVoice(voice))
            }
            SpeechEnd::Error(SpeechErrorCode::SynthesisFailed(message)) => {
                ChunkOutcome::Failed(NarrationError::generation(message))
            }
            SpeechEnd::Error(SpeechErrorCode::Unavailable(message)) => {
                ChunkOutcome::Failed(NarrationError::unavailable(message))
            }
        }
    }
}

#[async_trait]
impl<F: SpeechFacility + 'static> NarrationBackend for DirectSpeechBackend<F> {
    fn name(&self) -> &'static str {
        "speech"
    }

    fn check_ready(&self) -> Result<(), NarrationError> {
        self.facility.probe().map_err(NarrationError::unavailable)
    }

    fn check_voice(&self, voice: &VoiceSettings) -> Result<(), NarrationError> {
        let catalog = self.facility.voices();
        // Facilities that cannot enumerate voices accept anything.
        if catalog.is_empty() {
            return Ok(());
        }
        let wanted = voice.voice_or_lang().to_ascii_lowercase();
        let known = catalog.iter().any(|info| {
            info.id.eq_ignore_ascii_case(&wanted)
                || info.name.eq_ignore_ascii_case(&wanted)
                || info.lang.to_ascii_lowercase().starts_with(&wanted)
        });
        if known {
            Ok(())
        } else {
            Err(NarrationError::UnsupportedLanguageOrVoice(wanted))
        }
    }

    async fn synthesize_and_play(
        &self,
        chunk: &Chunk,
        voice: &VoiceSettings,
        ctx: &ChunkContext,
    ) -> ChunkOutcome {
        if ctx.pause.wait_until_resumed(&ctx.token).await.is_err() {
            return ChunkOutcome::Aborted;
        }

        let (tx, rx) = oneshot::channel::<SpeechEnd>();
        let mut tx = Some(tx);
        let started = ctx.output_started_fn();
        let on_event: SpeechCallback = Box::new(move |event| {
            let end = match event {
                SpeechEvent::Started => {
                    started();
                    return;
                }
                SpeechEvent::Ended => SpeechEnd::Ended,
                SpeechEvent::Error(code) => SpeechEnd::Error(code),
            };
            // Only the first terminal event counts.
            if let Some(sender) = tx.take() {
                let _ = sender.send(end);
            }
        });

        let id = self
            .facility
            .speak(Utterance::new(&chunk.text, voice), on_event);
        debug!(utterance = id, chars = chunk.text.len(), "Queued utterance");

        tokio::select! {
            biased;
            _ = ctx.token.cancelled() => {
                self.facility.cancel_utterance(id);
                ChunkOutcome::Aborted
            }
            end = rx => match end {
                Ok(end) => self.classify(end, ctx),
                Err(_) => {
                    warn!(utterance = id, "Speech facility dropped utterance without a result");
                    if ctx.is_cancelled() {
                        ChunkOutcome::Aborted
                    } else {
                        ChunkOutcome::Failed(NarrationError::playback("utterance dropped"))
                    }
                }
            }
        }
    }

    fn pause_output(&self) {
        if !self.facility.pause() {
            debug!("Speech facility cannot pause in place");
        }
    }

    fn resume_output(&self) {
        self.facility.resume();
    }

    fn stop_output(&self) {
        self.facility.cancel();
    }
}
