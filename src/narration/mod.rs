//! Read-aloud narration over a loaded document.

mod controller;
pub mod observer;
mod session;
pub mod state;

pub use controller::{NarrationController, NarrationOptions};
pub use observer::{NarrationObserver, NoopObserver};
pub use state::{Chunk, PlaybackState, VoiceSettings};

#[cfg(test)]
mod tests;
