use super::defaults;
use crate::narration::state::{VoiceSettings, clamp_speed, clamp_volume};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Narrator configuration; deserializable from TOML.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NarratorConfig {
    #[serde(default = "defaults::default_log_level")]
    pub log_level: LogLevel,
    #[serde(default = "defaults::default_backend")]
    pub backend: BackendKind,
    #[serde(default = "defaults::default_max_chunk_len")]
    pub max_chunk_len: usize,
    #[serde(default = "defaults::default_lines_per_page")]
    pub lines_per_page: usize,
    #[serde(default = "defaults::default_tts_speed")]
    pub tts_speed: f32,
    #[serde(default = "defaults::default_tts_volume")]
    pub tts_volume: f32,
    #[serde(default = "defaults::default_tts_lang")]
    pub tts_lang: String,
    #[serde(default)]
    pub tts_voice: Option<String>,
    #[serde(default = "defaults::default_speech_command")]
    pub speech_command: String,
    /// External generator argv; empty means the Piper worker is used.
    #[serde(default)]
    pub generate_command: Vec<String>,
    #[serde(default = "defaults::default_tts_model")]
    pub tts_model_path: String,
    #[serde(default = "defaults::default_tts_espeak_path")]
    pub tts_espeak_path: String,
    #[serde(default = "defaults::default_sink_poll_interval_ms")]
    pub sink_poll_interval_ms: u64,
    #[serde(default = "defaults::default_cache_dir")]
    pub cache_dir: String,
    #[serde(default = "defaults::default_audio_cache")]
    pub audio_cache: bool,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        NarratorConfig {
            log_level: defaults::default_log_level(),
            backend: defaults::default_backend(),
            max_chunk_len: defaults::default_max_chunk_len(),
            lines_per_page: defaults::default_lines_per_page(),
            tts_speed: defaults::default_tts_speed(),
            tts_volume: defaults::default_tts_volume(),
            tts_lang: defaults::default_tts_lang(),
            tts_voice: None,
            speech_command: defaults::default_speech_command(),
            generate_command: Vec::new(),
            tts_model_path: defaults::default_tts_model(),
            tts_espeak_path: defaults::default_tts_espeak_path(),
            sink_poll_interval_ms: defaults::default_sink_poll_interval_ms(),
            cache_dir: defaults::default_cache_dir(),
            audio_cache: defaults::default_audio_cache(),
        }
    }
}

impl NarratorConfig {
    /// Clamp values that would otherwise break narration.
    pub fn normalized(mut self) -> Self {
        self.tts_speed = clamp_speed(self.tts_speed);
        self.tts_volume = clamp_volume(self.tts_volume);
        self.max_chunk_len = self.max_chunk_len.max(1);
        self.lines_per_page = self.lines_per_page.max(1);
        self.tts_voice = self.tts_voice.filter(|v| !v.trim().is_empty());
        if self.tts_lang.trim().is_empty() {
            self.tts_lang = defaults::default_tts_lang();
        }
        self
    }

    pub fn voice_settings(&self) -> VoiceSettings {
        VoiceSettings {
            voice: self.tts_voice.clone(),
            lang: self.tts_lang.clone(),
            speed: self.tts_speed,
            volume: self.tts_volume,
        }
        .clamped()
    }

    pub fn cache_root(&self) -> PathBuf {
        PathBuf::from(&self.cache_dir)
    }

    pub fn sink_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sink_poll_interval_ms)
    }
}

/// Which narration backend family to drive.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Speak directly through a speech facility.
    #[default]
    Speech,
    /// Generate audio, then decode and play it.
    Generate,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            BackendKind::Speech => "speech",
            BackendKind::Generate => "generate",
        };
        write!(f, "{}", label)
    }
}

/// Supported logging verbosity levels.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_filter_str())
    }
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
