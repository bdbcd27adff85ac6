//! Generate-then-play narration: a generator renders a chunk to WAV bytes,
//! which are decoded and handed to a shared audio sink.

use super::{ChunkContext, ChunkOutcome, NarrationBackend};
use crate::cancellation::CancellationToken;
use crate::error::NarrationError;
use crate::narration::state::{Chunk, VoiceSettings};
use async_trait::async_trait;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Renders text to an encoded audio buffer.
#[async_trait]
pub trait AudioGenerator: Send + Sync {
    fn id(&self) -> &str;

    fn check_voice(&self, _voice: &VoiceSettings) -> Result<(), NarrationError> {
        Ok(())
    }

    /// Returns WAV bytes for `text`.
    async fn generate(&self, text: &str, voice: &VoiceSettings) -> Result<Vec<u8>, NarrationError>;
}

/// Shared audio output. Only one buffer plays at a time.
pub trait AudioSink: Send + Sync {
    /// Open the output device. Idempotent.
    fn ensure_active(&self) -> Result<(), NarrationError>;

    fn is_active(&self) -> bool;

    /// Start playing `audio`. The receiver resolves when playback ends, or is
    /// dropped if it was cut short. Playback requested under an already
    /// cancelled token is discarded.
    fn start(
        &self,
        audio: DecodedAudio,
        volume: f32,
        token: &CancellationToken,
    ) -> Result<oneshot::Receiver<()>, NarrationError>;

    fn pause(&self);

    fn resume(&self);

    /// Silence everything immediately.
    fn stop(&self);
}

/// Interleaved PCM ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as f64 / f64::from(self.channels);
        Duration::from_secs_f64(frames / f64::from(self.sample_rate))
    }
}

pub fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, NarrationError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|err| NarrationError::playback(format!("invalid WAV data: {err}")))?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>(),
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|sample| sample.map(|s| s as f32 * scale))
                .collect::<Result<Vec<_>, _>>()
        }
    }
    .map_err(|err| NarrationError::playback(format!("corrupt WAV samples: {err}")))?;

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Encode samples as 16-bit PCM WAV.
pub fn encode_wav(sample_rate: u32, channels: u16, samples: &[f32]) -> Result<Vec<u8>, NarrationError> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut buffer, spec)
            .map_err(|err| NarrationError::generation(err.to_string()))?;
        for &s in samples {
            let clamped = (s * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            writer
                .write_sample(clamped)
                .map_err(|err| NarrationError::generation(err.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|err| NarrationError::generation(err.to_string()))?;
    }
    Ok(buffer.into_inner())
}

pub struct GenerateThenPlayBackend {
    generator: Arc<dyn AudioGenerator>,
    sink: Arc<dyn AudioSink>,
}

impl GenerateThenPlayBackend {
    pub fn new(generator: Arc<dyn AudioGenerator>, sink: Arc<dyn AudioSink>) -> Self {
        Self { generator, sink }
    }
}

#[async_trait]
impl NarrationBackend for GenerateThenPlayBackend {
    fn name(&self) -> &'static str {
        "generate"
    }

    fn ensure_active(&self) -> Result<(), NarrationError> {
        self.sink.ensure_active()
    }

    fn check_ready(&self) -> Result<(), NarrationError> {
        if self.sink.is_active() {
            Ok(())
        } else {
            Err(NarrationError::unavailable(
                "audio output is not active; activate it from a user action first",
            ))
        }
    }

    fn check_voice(&self, voice: &VoiceSettings) -> Result<(), NarrationError> {
        self.generator.check_voice(voice)
    }

    async fn synthesize_and_play(
        &self,
        chunk: &Chunk,
        voice: &VoiceSettings,
        ctx: &ChunkContext,
    ) -> ChunkOutcome {
        let generated = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => return ChunkOutcome::Aborted,
            generated = self.generator.generate(&chunk.text, voice) => generated,
        };
        if ctx.token.check_cancelled("after-generate").is_err() {
            return ChunkOutcome::Aborted;
        }
        let bytes = match generated {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    generator = self.generator.id(),
                    ordinal = chunk.source_ordinal,
                    "Generation failed: {err}"
                );
                return ChunkOutcome::Failed(err);
            }
        };

        let audio = match decode_wav(&bytes) {
            Ok(audio) => audio,
            Err(err) => return ChunkOutcome::Failed(err),
        };
        if ctx.token.check_cancelled("after-decode").is_err() {
            return ChunkOutcome::Aborted;
        }
        debug!(
            ordinal = chunk.source_ordinal,
            duration_ms = audio.duration().as_millis(),
            "Decoded chunk audio"
        );

        // Generation may run while paused; output may not.
        if ctx.pause.wait_until_resumed(&ctx.token).await.is_err() {
            return ChunkOutcome::Aborted;
        }

        let done = match self.sink.start(audio, voice.volume, &ctx.token) {
            Ok(done) => done,
            Err(err) => return ChunkOutcome::Failed(err),
        };
        ctx.output_started();

        tokio::select! {
            biased;
            _ = ctx.token.cancelled() => ChunkOutcome::Aborted,
            finished = done => match finished {
                Ok(()) => ChunkOutcome::Completed,
                Err(_) if ctx.is_cancelled() => ChunkOutcome::Aborted,
                Err(_) => ChunkOutcome::Failed(NarrationError::playback("playback cut short")),
            }
        }
    }

    fn pause_output(&self) {
        self.sink.pause();
    }

    fn resume_output(&self) {
        self.sink.resume();
    }

    fn stop_output(&self) {
        self.sink.stop();
    }
}
