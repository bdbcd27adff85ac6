use serde::{Deserialize, Serialize};

pub const MIN_TTS_SPEED: f32 = 0.5;
pub const MAX_TTS_SPEED: f32 = 3.0;
pub const MIN_TTS_VOLUME: f32 = 0.0;
pub const MAX_TTS_VOLUME: f32 = 2.0;

/// Observable playback state of a narration controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Generating,
    Playing,
    Paused,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Generating => "generating",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        };
        write!(f, "{}", label)
    }
}

/// A bounded piece of one unit's text, fed to the backend as one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub source_ordinal: usize,
}

/// Voice parameters applied to every chunk of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_volume")]
    pub volume: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            voice: None,
            lang: default_lang(),
            speed: default_speed(),
            volume: default_volume(),
        }
    }
}

impl VoiceSettings {
    /// Voice name if one is selected, otherwise the language code.
    pub fn voice_or_lang(&self) -> &str {
        self.voice.as_deref().unwrap_or(&self.lang)
    }

    pub fn clamped(mut self) -> Self {
        self.speed = clamp_speed(self.speed);
        self.volume = clamp_volume(self.volume);
        self
    }
}

pub fn clamp_speed(speed: f32) -> f32 {
    if speed.is_finite() {
        speed.clamp(MIN_TTS_SPEED, MAX_TTS_SPEED)
    } else {
        default_speed()
    }
}

pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_finite() {
        volume.clamp(MIN_TTS_VOLUME, MAX_TTS_VOLUME)
    } else {
        default_volume()
    }
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_speed() -> f32 {
    1.0
}

fn default_volume() -> f32 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_speed_and_volume() {
        let settings = VoiceSettings {
            speed: 9.0,
            volume: -1.0,
            ..VoiceSettings::default()
        }
        .clamped();
        assert_eq!(settings.speed, MAX_TTS_SPEED);
        assert_eq!(settings.volume, MIN_TTS_VOLUME);
        assert_eq!(clamp_speed(f32::NAN), 1.0);
    }

    #[test]
    fn voice_falls_back_to_lang() {
        let mut settings = VoiceSettings::default();
        assert_eq!(settings.voice_or_lang(), "en");
        settings.voice = Some("en-us".into());
        assert_eq!(settings.voice_or_lang(), "en-us");
    }
}
