use crate::error::NarrationError;

/// Shared abort flag for one narration session.
///
/// Cloning yields another handle to the same flag. Once cancelled a token
/// stays cancelled; sessions allocate a fresh token on every start.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    inner: tokio_util::sync::CancellationToken,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    pub fn check_cancelled(&self, stage: &'static str) -> Result<(), NarrationError> {
        if self.is_cancelled() {
            tracing::debug!(stage, "Narration step observed cancellation");
            return Err(NarrationError::AbortedByUser);
        }
        Ok(())
    }

    /// Resolves once `cancel` has been called, immediately if it already was.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }
}
