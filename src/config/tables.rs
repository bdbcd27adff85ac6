use super::defaults;
use super::models::{BackendKind, LogLevel, NarratorConfig};
use serde::Deserialize;

/// Sectioned on-disk layout of [`NarratorConfig`].
#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
pub(super) struct ConfigTables {
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    narration: NarrationConfig,
    #[serde(default)]
    tts: TtsConfig,
    #[serde(default)]
    storage: StorageConfig,
}

pub(super) const TABLE_NAMES: [&str; 4] = ["logging", "narration", "tts", "storage"];

impl From<ConfigTables> for NarratorConfig {
    fn from(tables: ConfigTables) -> Self {
        NarratorConfig {
            log_level: tables.logging.log_level,
            backend: tables.narration.backend,
            max_chunk_len: tables.narration.max_chunk_len,
            lines_per_page: tables.narration.lines_per_page,
            tts_speed: tables.tts.tts_speed,
            tts_volume: tables.tts.tts_volume,
            tts_lang: tables.tts.tts_lang,
            tts_voice: tables.tts.tts_voice,
            speech_command: tables.tts.speech_command,
            generate_command: tables.tts.generate_command,
            tts_model_path: tables.tts.tts_model_path,
            tts_espeak_path: tables.tts.tts_espeak_path,
            sink_poll_interval_ms: tables.tts.sink_poll_interval_ms,
            cache_dir: tables.storage.cache_dir,
            audio_cache: tables.storage.audio_cache,
        }
    }
}

impl From<&NarratorConfig> for ConfigTables {
    fn from(config: &NarratorConfig) -> Self {
        ConfigTables {
            logging: LoggingConfig {
                log_level: config.log_level,
            },
            narration: NarrationConfig {
                backend: config.backend,
                max_chunk_len: config.max_chunk_len,
                lines_per_page: config.lines_per_page,
            },
            tts: TtsConfig {
                tts_speed: config.tts_speed,
                tts_volume: config.tts_volume,
                tts_lang: config.tts_lang.clone(),
                tts_voice: config.tts_voice.clone(),
                speech_command: config.speech_command.clone(),
                generate_command: config.generate_command.clone(),
                tts_model_path: config.tts_model_path.clone(),
                tts_espeak_path: config.tts_espeak_path.clone(),
                sink_poll_interval_ms: config.sink_poll_interval_ms,
            },
            storage: StorageConfig {
                cache_dir: config.cache_dir.clone(),
                audio_cache: config.audio_cache,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct LoggingConfig {
    #[serde(default = "defaults::default_log_level")]
    log_level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: defaults::default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct NarrationConfig {
    #[serde(default = "defaults::default_backend")]
    backend: BackendKind,
    #[serde(default = "defaults::default_max_chunk_len")]
    max_chunk_len: usize,
    #[serde(default = "defaults::default_lines_per_page")]
    lines_per_page: usize,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        NarrationConfig {
            backend: defaults::default_backend(),
            max_chunk_len: defaults::default_max_chunk_len(),
            lines_per_page: defaults::default_lines_per_page(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct TtsConfig {
    #[serde(default = "defaults::default_tts_speed")]
    tts_speed: f32,
    #[serde(default = "defaults::default_tts_volume")]
    tts_volume: f32,
    #[serde(default = "defaults::default_tts_lang")]
    tts_lang: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tts_voice: Option<String>,
    #[serde(default = "defaults::default_speech_command")]
    speech_command: String,
    #[serde(default)]
    generate_command: Vec<String>,
    #[serde(default = "defaults::default_tts_model")]
    tts_model_path: String,
    #[serde(default = "defaults::default_tts_espeak_path")]
    tts_espeak_path: String,
    #[serde(default = "defaults::default_sink_poll_interval_ms")]
    sink_poll_interval_ms: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        TtsConfig {
            tts_speed: defaults::default_tts_speed(),
            tts_volume: defaults::default_tts_volume(),
            tts_lang: defaults::default_tts_lang(),
            tts_voice: None,
            speech_command: defaults::default_speech_command(),
            generate_command: Vec::new(),
            tts_model_path: defaults::default_tts_model(),
            tts_espeak_path: defaults::default_tts_espeak_path(),
            sink_poll_interval_ms: defaults::default_sink_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct StorageConfig {
    #[serde(default = "defaults::default_cache_dir")]
    cache_dir: String,
    #[serde(default = "defaults::default_audio_cache")]
    audio_cache: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            cache_dir: defaults::default_cache_dir(),
            audio_cache: defaults::default_audio_cache(),
        }
    }
}
