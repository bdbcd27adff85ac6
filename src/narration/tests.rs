use super::*;
use crate::backend::{ChunkContext, ChunkOutcome, NarrationBackend};
use crate::document::Document;
use crate::error::NarrationError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, mpsc};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    State(PlaybackState),
    Position(usize),
    Finished,
    Error(NarrationError),
}

struct RecordingObserver {
    tx: mpsc::UnboundedSender<Event>,
}

impl NarrationObserver for RecordingObserver {
    fn on_position_changed(&self, ordinal: usize) {
        let _ = self.tx.send(Event::Position(ordinal));
    }

    fn on_state_changed(&self, state: PlaybackState) {
        let _ = self.tx.send(Event::State(state));
    }

    fn on_finished(&self) {
        let _ = self.tx.send(Event::Finished);
    }

    fn on_error(&self, error: &NarrationError) {
        let _ = self.tx.send(Event::Error(error.clone()));
    }
}

/// Backend whose chunks either complete at once or wait for a permit.
struct ScriptedBackend {
    hold: bool,
    permits: Semaphore,
    fail_on: Vec<String>,
    ready_error: Option<NarrationError>,
    calls: Mutex<Vec<(String, f32)>>,
    outcomes: Mutex<Vec<ChunkOutcome>>,
    stops: AtomicUsize,
}

impl ScriptedBackend {
    fn instant() -> Self {
        Self {
            hold: false,
            permits: Semaphore::new(0),
            fail_on: Vec::new(),
            ready_error: None,
            calls: Mutex::new(Vec::new()),
            outcomes: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
        }
    }

    fn holding() -> Self {
        Self {
            hold: true,
            ..Self::instant()
        }
    }

    fn release(&self) {
        self.permits.add_permits(1);
    }

    fn texts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _)| text.clone())
            .collect()
    }

    async fn play(&self, chunk: &Chunk, ctx: &ChunkContext) -> ChunkOutcome {
        if ctx.pause.wait_until_resumed(&ctx.token).await.is_err() {
            return ChunkOutcome::Aborted;
        }
        if self.fail_on.contains(&chunk.text) {
            return ChunkOutcome::Failed(NarrationError::generation("scripted failure"));
        }
        ctx.output_started();
        if !self.hold {
            tokio::task::yield_now().await;
            return ChunkOutcome::Completed;
        }
        tokio::select! {
            biased;
            _ = ctx.token.cancelled() => ChunkOutcome::Aborted,
            permit = self.permits.acquire() => {
                if let Ok(permit) = permit {
                    permit.forget();
                }
                ChunkOutcome::Completed
            }
        }
    }
}

#[async_trait]
impl NarrationBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn check_ready(&self) -> Result<(), NarrationError> {
        match &self.ready_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn synthesize_and_play(
        &self,
        chunk: &Chunk,
        voice: &VoiceSettings,
        ctx: &ChunkContext,
    ) -> ChunkOutcome {
        self.calls
            .lock()
            .unwrap()
            .push((chunk.text.clone(), voice.speed));
        let outcome = self.play(chunk, ctx).await;
        self.outcomes.lock().unwrap().push(outcome.clone());
        outcome
    }

    fn stop_output(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness<B> {
    controller: NarrationController,
    backend: Arc<B>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl<B: NarrationBackend + 'static> Harness<B> {
    fn new(backend: B, units: &[&str]) -> Self {
        Self::with_chunk_len(backend, units, 200)
    }

    fn with_chunk_len(backend: B, units: &[&str], max_chunk_len: usize) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let backend = Arc::new(backend);
        let controller = NarrationController::new(
            Handle::current(),
            backend.clone(),
            Arc::new(RecordingObserver { tx }),
            NarrationOptions {
                max_chunk_len,
                voice: VoiceSettings::default(),
            },
        );
        controller.load_document(Arc::new(Document::from_texts(units.iter().copied())));
        Self {
            controller,
            backend,
            events,
        }
    }

    async fn next(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("observer channel closed")
    }

    /// Collect events up to and including the first one matching `done`.
    async fn until(&mut self, done: impl Fn(&Event) -> bool) -> Vec<Event> {
        let mut seen = Vec::new();
        loop {
            let event = self.next().await;
            let stop = done(&event);
            seen.push(event);
            if stop {
                return seen;
            }
        }
    }

    async fn assert_quiet(&mut self) {
        let extra = tokio::time::timeout(Duration::from_millis(60), self.events.recv()).await;
        assert!(extra.is_err(), "unexpected event: {extra:?}");
    }
}

fn positions(events: &[Event]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Position(ordinal) => Some(*ordinal),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn narrates_to_the_end_skipping_blank_units() {
    let mut h = Harness::new(ScriptedBackend::instant(), &["A. B.", "", "C."]);
    h.controller.play_from(0);

    let events = h.until(|e| *e == Event::Finished).await;
    assert_eq!(
        events,
        vec![
            Event::State(PlaybackState::Generating),
            Event::State(PlaybackState::Playing),
            Event::Position(0),
            Event::State(PlaybackState::Generating),
            Event::State(PlaybackState::Playing),
            Event::Position(2),
            Event::State(PlaybackState::Stopped),
            Event::Finished,
        ]
    );
    assert_eq!(h.backend.texts(), vec!["A. B.", "C."]);
    assert_eq!(h.controller.state(), PlaybackState::Stopped);
    assert_eq!(h.controller.current_ordinal(), 2);
    assert!(!h.controller.is_live());
}

#[tokio::test]
async fn stop_never_reports_finished() {
    let mut h = Harness::new(ScriptedBackend::holding(), &["One.", "Two."]);
    h.controller.play_from(0);
    h.until(|e| *e == Event::State(PlaybackState::Playing)).await;

    h.controller.stop();
    assert_eq!(h.next().await, Event::State(PlaybackState::Stopped));
    assert_eq!(h.controller.state(), PlaybackState::Stopped);
    assert!(h.backend.stops.load(Ordering::SeqCst) >= 1);

    // Completing the held chunk after the abort must not move anything.
    h.backend.release();
    h.assert_quiet().await;
    assert_eq!(h.controller.current_ordinal(), 0);
    assert_eq!(h.backend.texts(), vec!["One."]);
}

#[tokio::test]
async fn stop_resolves_the_inflight_chunk_as_aborted() {
    let mut h = Harness::new(ScriptedBackend::holding(), &["One."]);
    h.controller.play_from(0);
    h.until(|e| *e == Event::State(PlaybackState::Playing)).await;

    h.controller.stop();
    tokio::time::timeout(Duration::from_millis(200), async {
        loop {
            if h.backend.outcomes.lock().unwrap().contains(&ChunkOutcome::Aborted) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("in-flight chunk should abort promptly");
}

#[tokio::test]
async fn superseding_play_from_only_reports_the_new_session() {
    let units = ["U0.", "U1.", "U2.", "U3.", "U4.", "U5."];
    let mut h = Harness::new(ScriptedBackend::instant(), &units);
    h.controller.play_from(5);
    h.controller.play_from(2);

    let events = h.until(|e| *e == Event::Finished).await;
    assert_eq!(positions(&events), vec![2, 3, 4, 5]);
    assert_eq!(
        &events[..2],
        &[
            Event::State(PlaybackState::Generating),
            Event::State(PlaybackState::Stopped),
        ]
    );
    assert_eq!(h.backend.texts(), vec!["U2.", "U3.", "U4.", "U5."]);
}

#[tokio::test]
async fn pause_and_resume_keep_the_cursor_and_chunk() {
    let mut h = Harness::new(ScriptedBackend::holding(), &["One.", "Two."]);
    h.controller.play_from(0);
    h.until(|e| *e == Event::State(PlaybackState::Playing)).await;

    h.controller.pause();
    assert_eq!(h.next().await, Event::State(PlaybackState::Paused));
    assert_eq!(h.controller.state(), PlaybackState::Paused);
    assert_eq!(h.controller.current_ordinal(), 0);

    h.controller.resume();
    assert_eq!(h.next().await, Event::State(PlaybackState::Playing));

    h.backend.release();
    assert_eq!(h.next().await, Event::Position(0));
    h.backend.release();
    let rest = h.until(|e| *e == Event::Finished).await;
    assert_eq!(positions(&rest), vec![1]);
    assert_eq!(h.backend.texts(), vec!["One.", "Two."]);
}

#[tokio::test]
async fn pause_holds_the_next_chunk_until_resume() {
    let mut h = Harness::new(ScriptedBackend::holding(), &["One.", "Two."]);
    h.controller.play_from(0);
    h.until(|e| *e == Event::State(PlaybackState::Playing)).await;

    h.controller.pause();
    h.until(|e| *e == Event::State(PlaybackState::Paused)).await;
    h.backend.release();
    assert_eq!(h.next().await, Event::Position(0));
    // The second unit is requested but may not start output while paused.
    h.assert_quiet().await;
    assert_eq!(h.controller.state(), PlaybackState::Paused);

    h.controller.resume();
    let resumed = h.until(|e| *e == Event::State(PlaybackState::Playing)).await;
    assert_eq!(resumed[0], Event::State(PlaybackState::Generating));
    h.backend.release();
    h.until(|e| *e == Event::Finished).await;
}

#[tokio::test]
async fn failed_chunk_is_reported_and_skipped() {
    let backend = ScriptedBackend {
        fail_on: vec!["Two.".to_string()],
        ..ScriptedBackend::instant()
    };
    let mut h = Harness::new(backend, &["One.", "Two.", "Three."]);
    h.controller.play_from(0);

    let events = h.until(|e| *e == Event::Finished).await;
    assert_eq!(positions(&events), vec![0, 2]);
    assert!(events.contains(&Event::Error(NarrationError::generation(
        "scripted failure"
    ))));
}

#[tokio::test]
async fn unavailable_backend_stops_without_finishing() {
    let backend = ScriptedBackend {
        ready_error: Some(NarrationError::unavailable("no audio")),
        ..ScriptedBackend::instant()
    };
    let mut h = Harness::new(backend, &["One."]);
    h.controller.play_from(0);

    let events = h.until(|e| *e == Event::State(PlaybackState::Stopped)).await;
    assert_eq!(
        events,
        vec![
            Event::State(PlaybackState::Generating),
            Event::Error(NarrationError::unavailable("no audio")),
            Event::State(PlaybackState::Stopped),
        ]
    );
    h.assert_quiet().await;
    assert!(h.backend.texts().is_empty());
}

#[tokio::test]
async fn empty_document_reports_error() {
    let mut h = Harness::new(ScriptedBackend::instant(), &[]);
    h.controller.play_from(0);
    let events = h.until(|e| *e == Event::State(PlaybackState::Stopped)).await;
    assert!(events.contains(&Event::Error(NarrationError::EmptyDocument)));
    h.assert_quiet().await;
}

#[tokio::test]
async fn long_unit_reports_position_once() {
    let mut h = Harness::with_chunk_len(
        ScriptedBackend::instant(),
        &["First sentence here. Second sentence here."],
        25,
    );
    h.controller.play_from(0);
    let events = h.until(|e| *e == Event::Finished).await;
    assert_eq!(positions(&events), vec![0]);
    assert_eq!(
        h.backend.texts(),
        vec!["First sentence here.", "Second sentence here."]
    );
}

#[tokio::test]
async fn restart_keeps_cursor_and_applies_new_speed() {
    let mut h = Harness::new(ScriptedBackend::holding(), &["One.", "Two.", "Three."]);
    h.controller.play_from(1);
    h.until(|e| *e == Event::State(PlaybackState::Playing)).await;

    assert_eq!(h.controller.set_speed(9.0), 3.0);
    h.controller.restart();
    h.until(|e| *e == Event::State(PlaybackState::Playing)).await;

    let calls = h.backend.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![("Two.".to_string(), 1.0), ("Two.".to_string(), 3.0)]
    );
    assert_eq!(h.controller.current_ordinal(), 1);
    h.controller.stop();
}

#[tokio::test]
async fn seeking_while_stopped_only_moves_the_cursor() {
    let mut h = Harness::new(ScriptedBackend::instant(), &["A.", "", "C.", "D."]);
    h.controller.seek_next();
    assert_eq!(h.next().await, Event::Position(2));
    h.controller.seek_previous();
    assert_eq!(h.next().await, Event::Position(0));
    h.controller.seek_previous();
    h.assert_quiet().await;
    assert_eq!(h.controller.state(), PlaybackState::Stopped);
    assert!(!h.controller.is_live());
}

#[tokio::test]
async fn seeking_while_live_restarts_there() {
    let mut h = Harness::new(ScriptedBackend::holding(), &["A.", "B.", "C."]);
    h.controller.play_from(0);
    h.until(|e| *e == Event::State(PlaybackState::Playing)).await;

    h.controller.seek_next();
    h.until(|e| *e == Event::State(PlaybackState::Playing)).await;
    assert_eq!(h.controller.current_ordinal(), 1);
    assert_eq!(h.backend.texts(), vec!["A.", "B."]);
    h.controller.stop();
}

#[tokio::test]
async fn toggle_cycles_through_states() {
    let mut h = Harness::new(ScriptedBackend::holding(), &["One."]);
    h.controller.toggle_play_pause();
    h.until(|e| *e == Event::State(PlaybackState::Playing)).await;

    h.controller.toggle_play_pause();
    assert_eq!(h.next().await, Event::State(PlaybackState::Paused));
    h.controller.toggle_play_pause();
    assert_eq!(h.next().await, Event::State(PlaybackState::Playing));

    h.controller.stop();
    assert_eq!(h.next().await, Event::State(PlaybackState::Stopped));
}

#[tokio::test]
async fn pause_and_resume_are_ignored_when_stopped() {
    let mut h = Harness::new(ScriptedBackend::instant(), &["One."]);
    h.controller.pause();
    h.controller.resume();
    h.controller.stop();
    h.assert_quiet().await;
    assert_eq!(h.controller.state(), PlaybackState::Stopped);
}

#[tokio::test]
async fn voice_settings_are_clamped_and_recorded() {
    let h = Harness::new(ScriptedBackend::instant(), &["One."]);
    assert_eq!(h.controller.set_volume(5.0), 2.0);
    h.controller.set_voice(Some("  ".into()));
    h.controller.set_lang("de");
    let voice = h.controller.voice_settings();
    assert_eq!(voice.voice, None);
    assert_eq!(voice.lang, "de");
    assert_eq!(voice.volume, 2.0);
}

#[cfg(unix)]
#[tokio::test]
async fn missing_speech_program_stops_without_progress() {
    use crate::backend::speech::DirectSpeechBackend;
    use crate::backend::speech_command::CommandSpeechFacility;

    let facility = CommandSpeechFacility::new("/nonexistent/lanternleaf-speech");
    let mut h = Harness::new(
        DirectSpeechBackend::new(Arc::new(facility)),
        &["One.", "Two.", "Three."],
    );
    h.controller.play_from(0);

    let events = h.until(|e| *e == Event::State(PlaybackState::Stopped)).await;
    assert_eq!(events.len(), 3, "{events:?}");
    assert_eq!(events[0], Event::State(PlaybackState::Generating));
    assert!(matches!(
        events[1],
        Event::Error(NarrationError::BackendUnavailable(_))
    ));
    h.assert_quiet().await;
    assert_eq!(h.controller.current_ordinal(), 0);
    assert!(!h.controller.is_live());
}

#[tokio::test]
async fn generated_audio_pause_during_generation_resumes_to_generating() {
    use crate::backend::generate::GenerateThenPlayBackend;
    use crate::backend::generate::tests::{ManualSink, ToneGenerator, wait_for_playback};

    let generator = Arc::new(ToneGenerator::holding());
    let sink = Arc::new(ManualSink::default());
    let mut h = Harness::new(
        GenerateThenPlayBackend::new(generator.clone(), sink.clone()),
        &["One.", "Two."],
    );
    h.controller.ensure_audio_active().unwrap();
    h.controller.play_from(0);

    generator.wait_for_calls(1).await;
    h.controller.pause();
    generator.release();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(sink.played.lock().unwrap().is_empty());
    assert_eq!(h.controller.state(), PlaybackState::Paused);

    h.controller.resume();
    wait_for_playback(&sink).await;
    sink.finish();
    generator.wait_for_calls(2).await;
    generator.release();
    wait_for_playback(&sink).await;
    sink.finish();

    let events = h.until(|e| *e == Event::Finished).await;
    assert_eq!(
        events,
        vec![
            Event::State(PlaybackState::Generating),
            Event::State(PlaybackState::Paused),
            Event::State(PlaybackState::Generating),
            Event::State(PlaybackState::Playing),
            Event::Position(0),
            Event::State(PlaybackState::Generating),
            Event::State(PlaybackState::Playing),
            Event::Position(1),
            Event::State(PlaybackState::Stopped),
            Event::Finished,
        ]
    );
    assert_eq!(sink.played.lock().unwrap().len(), 2);
}
