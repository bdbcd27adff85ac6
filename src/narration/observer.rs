use super::state::PlaybackState;
use crate::error::NarrationError;

/// Receives controller notifications. Every method defaults to a no-op, so
/// implementors only override what they consume.
///
/// Callbacks run on the thread that triggered them and must not block.
pub trait NarrationObserver: Send + Sync {
    fn on_position_changed(&self, _ordinal: usize) {}

    fn on_state_changed(&self, _state: PlaybackState) {}

    /// Natural completion only; never fired after `stop()`.
    fn on_finished(&self) {}

    fn on_error(&self, _error: &NarrationError) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl NarrationObserver for NoopObserver {}

/// Queued notification, dispatched after the controller lock is released.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Notification {
    State(PlaybackState),
    Finished,
    Error(NarrationError),
}

pub(crate) fn dispatch(observer: &dyn NarrationObserver, notes: Vec<Notification>) {
    for note in notes {
        match note {
            Notification::State(state) => observer.on_state_changed(state),
            Notification::Finished => observer.on_finished(),
            Notification::Error(err) => observer.on_error(&err),
        }
    }
}
