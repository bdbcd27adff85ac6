use crate::cache::save_bookmark;
use crate::error::NarrationError;
use crate::narration::{NarrationObserver, PlaybackState};
use std::path::PathBuf;
use tracing::{info, warn};

/// Prints narration progress and keeps the bookmark current.
pub struct ConsoleObserver {
    cache_root: PathBuf,
    doc_path: PathBuf,
}

impl ConsoleObserver {
    pub fn new(cache_root: PathBuf, doc_path: PathBuf) -> Self {
        Self {
            cache_root,
            doc_path,
        }
    }
}

impl NarrationObserver for ConsoleObserver {
    fn on_position_changed(&self, ordinal: usize) {
        println!("[unit {ordinal}]");
        save_bookmark(&self.cache_root, &self.doc_path, ordinal);
    }

    fn on_state_changed(&self, state: PlaybackState) {
        println!("<{state}>");
    }

    fn on_finished(&self) {
        info!(path = %self.doc_path.display(), "Reached end of document");
        println!("<finished>");
    }

    fn on_error(&self, error: &NarrationError) {
        warn!("Narration error: {error}");
        eprintln!("error: {error}");
    }
}
