use super::models::{BackendKind, LogLevel};

pub(crate) fn default_log_level() -> LogLevel {
    LogLevel::Info
}

pub(crate) fn default_backend() -> BackendKind {
    BackendKind::Speech
}

pub(crate) fn default_max_chunk_len() -> usize {
    crate::chunker::DEFAULT_MAX_CHUNK_LEN
}

pub(crate) fn default_lines_per_page() -> usize {
    60
}

pub(crate) fn default_tts_speed() -> f32 {
    1.0
}

pub(crate) fn default_tts_volume() -> f32 {
    1.0
}

pub(crate) fn default_tts_lang() -> String {
    "en".to_string()
}

pub(crate) fn default_speech_command() -> String {
    "espeak-ng".to_string()
}

pub(crate) fn default_tts_model() -> String {
    "/usr/share/piper-voices/en/en_US/ryan/high/en_US-ryan-high.onnx".to_string()
}

pub(crate) fn default_tts_espeak_path() -> String {
    "/usr/share".to_string()
}

pub(crate) fn default_sink_poll_interval_ms() -> u64 {
    100
}

pub(crate) fn default_cache_dir() -> String {
    ".cache".to_string()
}

pub(crate) fn default_audio_cache() -> bool {
    true
}
