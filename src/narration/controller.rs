//! The narration state machine.
//!
//! A controller owns at most one live session. Every session gets a fresh
//! id, cancellation token and pause gate; the background task driving it
//! re-checks its id under the lock before touching state, so a superseded
//! session can never move the cursor or emit notifications.

use super::observer::{NarrationObserver, Notification, dispatch};
use super::session::{SessionPlan, run_session};
use super::state::{PlaybackState, VoiceSettings, clamp_speed, clamp_volume};
use crate::backend::{ChunkContext, NarrationBackend, PauseGate};
use crate::cancellation::CancellationToken;
use crate::chunker::DEFAULT_MAX_CHUNK_LEN;
use crate::cursor::PlaybackCursor;
use crate::document::Document;
use crate::error::NarrationError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct NarrationOptions {
    pub max_chunk_len: usize,
    pub voice: VoiceSettings,
}

impl Default for NarrationOptions {
    fn default() -> Self {
        Self {
            max_chunk_len: DEFAULT_MAX_CHUNK_LEN,
            voice: VoiceSettings::default(),
        }
    }
}

pub struct NarrationController {
    shared: Arc<Shared>,
    runtime: Handle,
}

pub(crate) struct Shared {
    pub(crate) backend: Arc<dyn NarrationBackend>,
    observer: Arc<dyn NarrationObserver>,
    pub(crate) max_chunk_len: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    state: PlaybackState,
    /// State to return to when a pause ends.
    resume_to: PlaybackState,
    cursor: PlaybackCursor,
    document: Arc<Document>,
    voice: VoiceSettings,
    live: Option<LiveSession>,
    next_session_id: u64,
}

struct LiveSession {
    id: u64,
    token: CancellationToken,
    pause: PauseGate,
    last_reported: Option<usize>,
}

impl Inner {
    fn live(&self, session_id: u64) -> Option<&LiveSession> {
        self.live.as_ref().filter(|live| live.id == session_id)
    }

    fn live_mut(&mut self, session_id: u64) -> Option<&mut LiveSession> {
        self.live.as_mut().filter(|live| live.id == session_id)
    }

    /// Abort the live session, if any. The caller must force-stop backend
    /// output once the lock is released.
    fn abort_live(&mut self) -> Option<u64> {
        let live = self.live.take()?;
        live.token.cancel();
        live.pause.resume();
        self.state = PlaybackState::Stopped;
        self.resume_to = PlaybackState::Stopped;
        Some(live.id)
    }
}

impl NarrationController {
    pub fn new(
        runtime: Handle,
        backend: Arc<dyn NarrationBackend>,
        observer: Arc<dyn NarrationObserver>,
        options: NarrationOptions,
    ) -> Self {
        info!(
            backend = backend.name(),
            max_chunk_len = options.max_chunk_len,
            "Creating narration controller"
        );
        let shared = Shared {
            backend,
            observer,
            max_chunk_len: options.max_chunk_len.max(1),
            inner: Mutex::new(Inner {
                state: PlaybackState::Stopped,
                resume_to: PlaybackState::Stopped,
                cursor: PlaybackCursor::new(0),
                document: Arc::new(Document::default()),
                voice: options.voice.clamped(),
                live: None,
                next_session_id: 0,
            }),
        };
        Self {
            shared: Arc::new(shared),
            runtime,
        }
    }

    /// Replace the document, stopping any live session. The cursor is kept
    /// when it is still inside the new document.
    pub fn load_document(&self, document: Arc<Document>) {
        self.stop();
        let mut inner = self.shared.lock();
        inner.cursor.set_unit_count(document.len());
        info!(units = document.len(), "Loaded document into narration controller");
        inner.document = document;
    }

    pub fn document(&self) -> Arc<Document> {
        Arc::clone(&self.shared.lock().document)
    }

    /// Start a new session at `ordinal`, superseding any live one.
    pub fn play_from(&self, ordinal: usize) {
        let (superseded, plan) = {
            let mut inner = self.shared.lock();
            let superseded = inner.abort_live();
            let start = inner.cursor.set(ordinal);
            inner.next_session_id = inner.next_session_id.wrapping_add(1);
            let id = inner.next_session_id;
            let token = CancellationToken::new();
            let pause = PauseGate::new();
            inner.live = Some(LiveSession {
                id,
                token: token.clone(),
                pause: pause.clone(),
                last_reported: None,
            });
            inner.state = PlaybackState::Generating;
            inner.resume_to = PlaybackState::Generating;
            let plan = SessionPlan {
                id,
                start,
                document: Arc::clone(&inner.document),
                voice: inner.voice.clone(),
                token,
                pause,
            };
            (superseded, plan)
        };

        let mut notes = Vec::new();
        if let Some(previous) = superseded {
            self.shared.backend.stop_output();
            debug!(previous, next = plan.id, "Superseded live narration session");
            notes.push(Notification::State(PlaybackState::Stopped));
        }
        info!(session = plan.id, start = plan.start, "Starting narration session");
        notes.push(Notification::State(PlaybackState::Generating));
        dispatch(self.shared.observer.as_ref(), notes);

        self.runtime.spawn(run_session(Arc::clone(&self.shared), plan));
    }

    pub fn pause(&self) {
        let paused = {
            let mut inner = self.shared.lock();
            match inner.state {
                PlaybackState::Playing | PlaybackState::Generating => {
                    let Some(live) = inner.live.as_ref() else {
                        return;
                    };
                    live.pause.pause();
                    inner.resume_to = inner.state;
                    inner.state = PlaybackState::Paused;
                    true
                }
                PlaybackState::Paused | PlaybackState::Stopped => false,
            }
        };
        if paused {
            info!("Pausing narration");
            self.shared.backend.pause_output();
            self.shared.observer.on_state_changed(PlaybackState::Paused);
        }
    }

    pub fn resume(&self) {
        let resumed = {
            let mut inner = self.shared.lock();
            if inner.state != PlaybackState::Paused {
                return;
            }
            let Some(live) = inner.live.as_ref() else {
                return;
            };
            live.pause.resume();
            inner.state = inner.resume_to;
            inner.state
        };
        info!(state = %resumed, "Resuming narration");
        self.shared.backend.resume_output();
        self.shared.observer.on_state_changed(resumed);
    }

    /// Abort the live session. Safe to call in any state.
    pub fn stop(&self) {
        let stopped = self.shared.lock().abort_live();
        if let Some(session) = stopped {
            self.shared.backend.stop_output();
            info!(session, "Narration stopped");
            self.shared.observer.on_state_changed(PlaybackState::Stopped);
        }
    }

    /// Stop and immediately play again from the cursor, e.g. after a voice
    /// or speed change.
    pub fn restart(&self) {
        let ordinal = self.current_ordinal();
        debug!(ordinal, "Restarting narration at cursor");
        self.play_from(ordinal);
    }

    pub fn toggle_play_pause(&self) {
        match self.state() {
            PlaybackState::Stopped => self.play_from(self.current_ordinal()),
            PlaybackState::Paused => self.resume(),
            PlaybackState::Playing | PlaybackState::Generating => self.pause(),
        }
    }

    /// Move to the next unit with text. Restarts narration there when live.
    pub fn seek_next(&self) {
        let (document, cursor) = self.document_and_cursor();
        if let Some(target) = document.next_speakable(cursor.saturating_add(1)) {
            self.seek_to(target);
        }
    }

    /// Move to the previous unit with text. Restarts narration there when live.
    pub fn seek_previous(&self) {
        let (document, cursor) = self.document_and_cursor();
        if cursor == 0 {
            return;
        }
        if let Some(target) = document.previous_speakable(cursor - 1) {
            self.seek_to(target);
        }
    }

    /// Move the cursor to `ordinal`; restarts narration there when live.
    pub fn seek_to(&self, ordinal: usize) {
        if self.is_live() {
            self.play_from(ordinal);
            return;
        }
        let moved = {
            let mut inner = self.shared.lock();
            let before = inner.cursor.get();
            let after = inner.cursor.set(ordinal);
            (before != after).then_some(after)
        };
        if let Some(ordinal) = moved {
            debug!(ordinal, "Moved cursor while stopped");
            self.shared.observer.on_position_changed(ordinal);
        }
    }

    /// Activate audio output. Call from a direct user action.
    pub fn ensure_audio_active(&self) -> Result<(), NarrationError> {
        self.shared.backend.ensure_active().inspect_err(|err| {
            warn!("Failed to activate audio output: {err}");
        })
    }

    pub fn set_voice(&self, voice: Option<String>) {
        let voice = voice.filter(|v| !v.trim().is_empty());
        info!(voice = ?voice, "Selected voice");
        self.shared.lock().voice.voice = voice;
    }

    pub fn set_lang(&self, lang: impl Into<String>) {
        let lang = lang.into();
        info!(%lang, "Selected language");
        self.shared.lock().voice.lang = lang;
    }

    /// Returns the clamped speed that was stored.
    pub fn set_speed(&self, speed: f32) -> f32 {
        let speed = clamp_speed(speed);
        info!(speed, "Adjusted narration speed");
        self.shared.lock().voice.speed = speed;
        speed
    }

    pub fn set_volume(&self, volume: f32) -> f32 {
        let volume = clamp_volume(volume);
        info!(volume, "Adjusted narration volume");
        self.shared.lock().voice.volume = volume;
        volume
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.lock().state
    }

    pub fn current_ordinal(&self) -> usize {
        self.shared.lock().cursor.get()
    }

    pub fn voice_settings(&self) -> VoiceSettings {
        self.shared.lock().voice.clone()
    }

    pub fn is_live(&self) -> bool {
        self.shared.lock().live.is_some()
    }

    fn document_and_cursor(&self) -> (Arc<Document>, usize) {
        let inner = self.shared.lock();
        (Arc::clone(&inner.document), inner.cursor.get())
    }
}

impl Drop for NarrationController {
    fn drop(&mut self) {
        if self.shared.lock().abort_live().is_some() {
            self.shared.backend.stop_output();
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn chunk_context(
        self: &Arc<Self>,
        session_id: u64,
        token: &CancellationToken,
        pause: &PauseGate,
    ) -> ChunkContext {
        let shared = Arc::clone(self);
        ChunkContext::new(
            token.clone(),
            pause.clone(),
            Arc::new(move || shared.output_started(session_id)),
        )
    }

    /// Show `Generating` at the start of a unit. Returns false if the session
    /// is no longer live.
    pub(crate) fn enter_generating(&self, session_id: u64) -> bool {
        let notify = {
            let mut inner = self.lock();
            if inner.live(session_id).is_none() {
                return false;
            }
            match inner.state {
                PlaybackState::Playing => {
                    inner.state = PlaybackState::Generating;
                    true
                }
                PlaybackState::Paused => {
                    inner.resume_to = PlaybackState::Generating;
                    false
                }
                _ => false,
            }
        };
        if notify {
            self.observer.on_state_changed(PlaybackState::Generating);
        }
        true
    }

    fn output_started(&self, session_id: u64) {
        let notify = {
            let mut inner = self.lock();
            if inner.live(session_id).is_none() {
                return;
            }
            match inner.state {
                PlaybackState::Generating => {
                    inner.state = PlaybackState::Playing;
                    true
                }
                PlaybackState::Paused => {
                    inner.resume_to = PlaybackState::Playing;
                    false
                }
                _ => false,
            }
        };
        if notify {
            self.observer.on_state_changed(PlaybackState::Playing);
        }
    }

    /// Record a completed chunk of unit `ordinal`. Returns false if the
    /// session is no longer live.
    pub(crate) fn advance(&self, session_id: u64, ordinal: usize) -> bool {
        let report = {
            let mut inner = self.lock();
            let Some(live) = inner.live_mut(session_id) else {
                return false;
            };
            let report = live.last_reported != Some(ordinal);
            live.last_reported = Some(ordinal);
            let stored = inner.cursor.set(ordinal);
            report.then_some(stored)
        };
        if let Some(ordinal) = report {
            debug!(session = session_id, ordinal, "Narration advanced");
            self.observer.on_position_changed(ordinal);
        }
        true
    }

    pub(crate) fn report_chunk_error(&self, session_id: u64, error: NarrationError) {
        let live = self.lock().live(session_id).is_some();
        if live {
            self.observer.on_error(&error);
        }
    }

    /// The session ran out of units without being aborted.
    pub(crate) fn finish_natural(&self, session_id: u64) {
        if !self.end_session(session_id) {
            return;
        }
        info!(session = session_id, "Narration finished");
        dispatch(
            self.observer.as_ref(),
            vec![
                Notification::State(PlaybackState::Stopped),
                Notification::Finished,
            ],
        );
    }

    /// The session cannot continue; surface the error and stop.
    pub(crate) fn finish_fatal(&self, session_id: u64, error: NarrationError) {
        if !self.end_session(session_id) {
            return;
        }
        warn!(session = session_id, "Narration session failed: {error}");
        self.backend.stop_output();
        dispatch(
            self.observer.as_ref(),
            vec![
                Notification::Error(error),
                Notification::State(PlaybackState::Stopped),
            ],
        );
    }

    fn end_session(&self, session_id: u64) -> bool {
        let mut inner = self.lock();
        if inner.live(session_id).is_none() {
            return false;
        }
        inner.live = None;
        inner.state = PlaybackState::Stopped;
        inner.resume_to = PlaybackState::Stopped;
        true
    }
}
