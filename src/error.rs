//! Error taxonomy for the narration core.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NarrationError {
    /// Expected control flow after `stop()`; never reported as a failure.
    #[error("narration aborted by user")]
    AbortedByUser,

    #[error("speech generation failed: {0}")]
    BackendGenerationFailure(String),

    #[error("audio playback failed: {0}")]
    BackendPlaybackFailure(String),

    #[error("no voice available for {0}")]
    UnsupportedLanguageOrVoice(String),

    #[error("narration backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("document has no text units")]
    EmptyDocument,
}

impl NarrationError {
    pub fn generation(message: impl Into<String>) -> Self {
        Self::BackendGenerationFailure(message.into())
    }

    pub fn playback(message: impl Into<String>) -> Self {
        Self::BackendPlaybackFailure(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable(message.into())
    }

    /// Fatal errors end the whole session; everything else only skips a chunk.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::UnsupportedLanguageOrVoice(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::NarrationError;

    #[test]
    fn only_backend_wide_errors_are_fatal() {
        assert!(NarrationError::unavailable("no device").is_fatal());
        assert!(NarrationError::UnsupportedLanguageOrVoice("xx".into()).is_fatal());
        assert!(!NarrationError::generation("boom").is_fatal());
        assert!(!NarrationError::playback("bad wav").is_fatal());
        assert!(!NarrationError::AbortedByUser.is_fatal());
    }
}
