//! Concrete [`AudioGenerator`]s.

use super::generate::AudioGenerator;
use crate::error::NarrationError;
use crate::narration::state::VoiceSettings;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runs an external program per chunk; the program reads text on stdin and
/// writes a WAV file to stdout.
///
/// Arguments may contain `{voice}`, `{lang}`, `{rate}` and `{wpm}`
/// placeholders, filled from the session's voice settings.
pub struct CommandGenerator {
    argv: Vec<String>,
}

impl CommandGenerator {
    pub fn new(argv: Vec<String>) -> Result<Self, NarrationError> {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(NarrationError::unavailable("generator command is empty"));
        }
        Ok(Self { argv })
    }

    fn expand(&self, voice: &VoiceSettings) -> Vec<String> {
        let wpm = (175.0 * voice.speed).round() as u32;
        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{voice}", voice.voice_or_lang())
                    .replace("{lang}", &voice.lang)
                    .replace("{rate}", &format!("{:.2}", voice.speed))
                    .replace("{wpm}", &wpm.to_string())
            })
            .collect()
    }
}

#[async_trait]
impl AudioGenerator for CommandGenerator {
    fn id(&self) -> &str {
        &self.argv[0]
    }

    async fn generate(&self, text: &str, voice: &VoiceSettings) -> Result<Vec<u8>, NarrationError> {
        let argv = self.expand(voice);
        debug!(program = %argv[0], chars = text.len(), "Running generator command");
        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                NarrationError::unavailable(format!("failed to start {}: {err}", argv[0]))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|err| NarrationError::generation(format!("writing text: {err}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|err| NarrationError::generation(err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NarrationError::generation(format!(
                "{} exited with {}: {}",
                argv[0],
                output.status,
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(NarrationError::generation("generator produced no audio"));
        }
        Ok(output.stdout)
    }
}

/// Caches generated audio on disk, keyed by generator, text and voice.
pub struct CachedGenerator {
    inner: Arc<dyn AudioGenerator>,
    dir: PathBuf,
}

impl CachedGenerator {
    pub fn new(inner: Arc<dyn AudioGenerator>, dir: PathBuf) -> Self {
        info!(dir = %dir.display(), generator = inner.id(), "Audio cache enabled");
        Self { inner, dir }
    }

    pub fn cache_path(&self, text: &str, voice: &VoiceSettings) -> PathBuf {
        cache_path(&self.dir, self.inner.id(), text, voice)
    }
}

fn cache_path(base: &Path, generator: &str, text: &str, voice: &VoiceSettings) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(generator.as_bytes());
    hasher.update([0]);
    hasher.update(voice.voice_or_lang().as_bytes());
    hasher.update([0]);
    hasher.update(text.as_bytes());
    hasher.update(voice.speed.to_le_bytes());
    let hash = format!("{:x}", hasher.finalize());
    base.join(format!("tts-{hash}.wav"))
}

fn temp_path(path: &Path) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let nonce = SEQ.fetch_add(1, Ordering::Relaxed);
    let mut name = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("tts.wav")
        .to_string();
    name.push_str(&format!(".tmp-{}-{nonce}", std::process::id()));
    path.with_file_name(name)
}

#[async_trait]
impl AudioGenerator for CachedGenerator {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn check_voice(&self, voice: &VoiceSettings) -> Result<(), NarrationError> {
        self.inner.check_voice(voice)
    }

    async fn generate(&self, text: &str, voice: &VoiceSettings) -> Result<Vec<u8>, NarrationError> {
        let path = self.cache_path(text, voice);
        match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => {
                debug!(path = %path.display(), "Audio cache hit");
                return Ok(bytes);
            }
            _ => {}
        }

        let bytes = self.inner.generate(text, voice).await?;

        if let Err(err) = tokio::fs::create_dir_all(&self.dir).await {
            warn!("Failed to create audio cache dir: {err}");
            return Ok(bytes);
        }
        let temp = temp_path(&path);
        let stored = match tokio::fs::write(&temp, &bytes).await {
            Ok(()) => tokio::fs::rename(&temp, &path).await,
            Err(err) => Err(err),
        };
        match stored {
            Ok(()) => debug!(path = %path.display(), "Stored generated audio"),
            Err(err) => {
                warn!(path = %path.display(), "Failed to cache generated audio: {err}");
                let _ = tokio::fs::remove_file(&temp).await;
            }
        }
        Ok(bytes)
    }
}
