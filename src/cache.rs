//! Per-document state: the narration bookmark and voice overrides.
//!
//! Files are stored under the cache root using a hash of the document path as
//! the directory name to avoid filesystem issues. Write failures are logged
//! and otherwise ignored so narration is never interrupted by persistence.

use crate::narration::state::VoiceSettings;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const BOOKMARK_FILE: &str = "bookmark.toml";
const NARRATION_FILE: &str = "narration.toml";

#[derive(Serialize, Deserialize)]
struct BookmarkEntry {
    ordinal: usize,
}

/// Load the saved narration position for a document, if present.
pub fn load_bookmark(cache_root: &Path, doc_path: &Path) -> Option<usize> {
    let path = hash_dir(cache_root, doc_path).join(BOOKMARK_FILE);
    let data = fs::read_to_string(path).ok()?;
    let entry: BookmarkEntry = toml::from_str(&data).ok()?;
    Some(entry.ordinal)
}

pub fn save_bookmark(cache_root: &Path, doc_path: &Path, ordinal: usize) {
    write_entry(
        &hash_dir(cache_root, doc_path).join(BOOKMARK_FILE),
        &BookmarkEntry { ordinal },
    );
}

pub fn load_narration_settings(cache_root: &Path, doc_path: &Path) -> Option<VoiceSettings> {
    let path = hash_dir(cache_root, doc_path).join(NARRATION_FILE);
    let data = fs::read_to_string(&path).ok()?;
    match toml::from_str::<VoiceSettings>(&data) {
        Ok(settings) => Some(settings.clamped()),
        Err(err) => {
            warn!(path = %path.display(), "Ignoring invalid narration settings: {err}");
            None
        }
    }
}

pub fn save_narration_settings(cache_root: &Path, doc_path: &Path, settings: &VoiceSettings) {
    write_entry(&hash_dir(cache_root, doc_path).join(NARRATION_FILE), settings);
}

fn write_entry<T: Serialize>(path: &Path, entry: &T) {
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            warn!(path = %parent.display(), "Failed to create cache dir: {err}");
            return;
        }
    }
    let contents = match toml::to_string(entry) {
        Ok(contents) => contents,
        Err(err) => {
            warn!("Failed to serialize cache entry: {err}");
            return;
        }
    };
    match fs::write(path, contents) {
        Ok(()) => debug!(path = %path.display(), "Saved cache entry"),
        Err(err) => warn!(path = %path.display(), "Failed to write cache entry: {err}"),
    }
}

pub fn hash_dir(cache_root: &Path, doc_path: &Path) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(doc_path.as_os_str().to_string_lossy().as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    cache_root.join(hash)
}

pub fn audio_cache_dir(cache_root: &Path, doc_path: &Path) -> PathBuf {
    hash_dir(cache_root, doc_path).join("audio")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bookmark_round_trips_per_document() {
        let root = tempfile::tempdir().unwrap();
        let a = Path::new("/books/a.txt");
        let b = Path::new("/books/b.txt");
        assert_eq!(load_bookmark(root.path(), a), None);
        save_bookmark(root.path(), a, 7);
        assert_eq!(load_bookmark(root.path(), a), Some(7));
        assert_eq!(load_bookmark(root.path(), b), None);
    }

    #[test]
    fn narration_settings_are_clamped_on_load() {
        let root = tempfile::tempdir().unwrap();
        let doc = Path::new("/books/a.txt");
        let settings = VoiceSettings {
            voice: Some("en-gb".into()),
            lang: "en".into(),
            speed: 1.5,
            volume: 1.0,
        };
        save_narration_settings(root.path(), doc, &settings);
        assert_eq!(load_narration_settings(root.path(), doc), Some(settings));

        let path = hash_dir(root.path(), doc).join(NARRATION_FILE);
        fs::write(&path, "lang = \"fr\"\nspeed = 40.0\n").unwrap();
        let loaded = load_narration_settings(root.path(), doc).unwrap();
        assert_eq!(loaded.lang, "fr");
        assert_eq!(loaded.speed, 3.0);
        assert_eq!(loaded.voice, None);
    }

    #[test]
    fn hash_dir_is_stable() {
        let root = Path::new(".cache");
        let doc = Path::new("/books/a.txt");
        assert_eq!(hash_dir(root, doc), hash_dir(root, doc));
        assert_ne!(hash_dir(root, doc), hash_dir(root, Path::new("/books/b.txt")));
        assert_eq!(
            audio_cache_dir(root, doc),
            hash_dir(root, doc).join("audio")
        );
    }
}
