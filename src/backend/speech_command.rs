//! Speech facility backed by an espeak-ng style command line synthesizer.
//!
//! Each utterance runs one child process that speaks straight to the audio
//! device. The child reads its text from stdin; a watcher thread reports the
//! exit status as a speech event.

use super::speech::{
    SpeechCallback, SpeechErrorCode, SpeechEvent, SpeechFacility, Utterance, UtteranceId,
    VoiceInfo,
};
use once_cell::sync::OnceCell;
use std::io::{ErrorKind, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// espeak-ng's default speaking rate in words per minute.
const BASE_WORDS_PER_MINUTE: f32 = 175.0;
const WATCH_INTERVAL: Duration = Duration::from_millis(20);

pub struct CommandSpeechFacility {
    program: String,
    next_id: AtomicU64,
    active: Arc<Mutex<Option<ActiveUtterance>>>,
    voices: OnceCell<Vec<VoiceInfo>>,
}

struct ActiveUtterance {
    id: UtteranceId,
    child: Child,
    interrupted: Arc<AtomicBool>,
    paused: bool,
}

impl CommandSpeechFacility {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            next_id: AtomicU64::new(1),
            active: Arc::new(Mutex::new(None)),
            voices: OnceCell::new(),
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveUtterance>> {
        lock(&self.active)
    }

    fn spawn_child(&self, utterance: &Utterance) -> std::io::Result<Child> {
        let voice = utterance
            .voice
            .clone()
            .unwrap_or_else(|| utterance.lang.clone());
        let mut child = Command::new(&self.program)
            .args(speech_args(&voice, utterance.rate, utterance.volume))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(err) = stdin.write_all(utterance.text.as_bytes()) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
            // Dropping stdin closes it so the synthesizer starts speaking.
        }
        Ok(child)
    }

    fn kill_active(&self, only: Option<UtteranceId>) {
        let mut active = self.lock_active();
        let Some(current) = active.as_mut() else {
            return;
        };
        if only.is_some_and(|id| id != current.id) {
            return;
        }
        current.interrupted.store(true, Ordering::Release);
        if current.paused {
            signal_child(&current.child, Signal::Continue);
        }
        if let Err(err) = current.child.kill() {
            debug!(utterance = current.id, "Speech process already exited: {err}");
        }
    }
}

/// Build synthesizer arguments for one utterance.
pub fn speech_args(voice: &str, rate: f32, volume: f32) -> Vec<String> {
    let wpm = (BASE_WORDS_PER_MINUTE * rate).round().clamp(80.0, 500.0) as u32;
    let amplitude = (volume * 100.0).round().clamp(0.0, 200.0) as u32;
    vec![
        "-v".to_string(),
        voice.to_string(),
        "-s".to_string(),
        wpm.to_string(),
        "-a".to_string(),
        amplitude.to_string(),
        "--stdin".to_string(),
    ]
}

impl SpeechFacility for CommandSpeechFacility {
    fn speak(&self, utterance: Utterance, mut on_event: SpeechCallback) -> UtteranceId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // One utterance at a time: a new one replaces whatever is speaking.
        self.kill_active(None);
        if let Some(mut replaced) = self.lock_active().take() {
            thread::spawn(move || {
                let _ = replaced.child.wait();
            });
        }

        let child = match self.spawn_child(&utterance) {
            Ok(child) => child,
            Err(err) => {
                warn!(program = %self.program, "Failed to start speech process: {err}");
                on_event(SpeechEvent::Error(spawn_error_code(&err)));
                return id;
            }
        };
        debug!(utterance = id, pid = child.id(), "Speech process started");

        let interrupted = Arc::new(AtomicBool::new(false));
        *self.lock_active() = Some(ActiveUtterance {
            id,
            child,
            interrupted: Arc::clone(&interrupted),
            paused: false,
        });
        on_event(SpeechEvent::Started);

        let active = Arc::clone(&self.active);
        thread::spawn(move || {
            let event = watch_child(&active, id, &interrupted);
            on_event(event);
        });
        id
    }

    fn cancel(&self) {
        self.kill_active(None);
    }

    fn cancel_utterance(&self, id: UtteranceId) {
        self.kill_active(Some(id));
    }

    fn pause(&self) -> bool {
        let mut active = self.lock_active();
        match active.as_mut() {
            Some(current) if !current.paused => {
                current.paused = signal_child(&current.child, Signal::Stop);
                current.paused
            }
            Some(_) => true,
            None => true,
        }
    }

    fn resume(&self) {
        let mut active = self.lock_active();
        if let Some(current) = active.as_mut().filter(|current| current.paused) {
            signal_child(&current.child, Signal::Continue);
            current.paused = false;
        }
    }

    fn voices(&self) -> Vec<VoiceInfo> {
        self.voices
            .get_or_init(|| match list_voices(&self.program) {
                Ok(voices) => {
                    info!(count = voices.len(), "Loaded speech voices");
                    voices
                }
                Err(err) => {
                    warn!(program = %self.program, "Could not list voices: {err}");
                    Vec::new()
                }
            })
            .clone()
    }

    fn probe(&self) -> Result<(), String> {
        Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|_| ())
            .map_err(|err| format!("cannot run {}: {err}", self.program))
    }
}

/// A program that cannot be started at all will not start for the next
/// utterance either.
fn spawn_error_code(err: &std::io::Error) -> SpeechErrorCode {
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied => {
            SpeechErrorCode::Unavailable(err.to_string())
        }
        _ => SpeechErrorCode::SynthesisFailed(err.to_string()),
    }
}

/// Poll the child until it exits, then translate its status.
fn watch_child(
    active: &Mutex<Option<ActiveUtterance>>,
    id: UtteranceId,
    interrupted: &AtomicBool,
) -> SpeechEvent {
    loop {
        let status = {
            let mut guard = lock(active);
            let Some(current) = guard.as_mut().filter(|current| current.id == id) else {
                // Replaced by a newer utterance, which killed this one.
                return SpeechEvent::Error(SpeechErrorCode::Interrupted);
            };
            match current.child.try_wait() {
                Ok(Some(status)) => {
                    let stderr = current.child.stderr.take();
                    *guard = None;
                    Ok((status, stderr))
                }
                Ok(None) => Err(None),
                Err(err) => {
                    *guard = None;
                    Err(Some(err))
                }
            }
        };

        match status {
            Ok(_) if interrupted.load(Ordering::Acquire) => {
                return SpeechEvent::Error(SpeechErrorCode::Interrupted);
            }
            Ok((status, _)) if status.success() => return SpeechEvent::Ended,
            Ok((status, stderr)) => {
                let detail = stderr
                    .map(|mut pipe| {
                        let mut text = String::new();
                        let _ = std::io::Read::read_to_string(&mut pipe, &mut text);
                        text
                    })
                    .unwrap_or_default();
                return classify_failure(status.code(), detail.trim());
            }
            Err(Some(err)) => {
                return SpeechEvent::Error(SpeechErrorCode::SynthesisFailed(err.to_string()));
            }
            Err(None) => thread::sleep(WATCH_INTERVAL),
        }
    }
}

fn classify_failure(code: Option<i32>, detail: &str) -> SpeechEvent {
    let lowered = detail.to_ascii_lowercase();
    if lowered.contains("voice") && (lowered.contains("not") || lowered.contains("unknown")) {
        return SpeechEvent::Error(SpeechErrorCode::VoiceUnavailable(detail.to_string()));
    }
    let message = match code {
        Some(code) if detail.is_empty() => format!("speech process exited with status {code}"),
        Some(code) => format!("speech process exited with status {code}: {detail}"),
        None => "speech process terminated by signal".to_string(),
    };
    SpeechEvent::Error(SpeechErrorCode::SynthesisFailed(message))
}

fn list_voices(program: &str) -> std::io::Result<Vec<VoiceInfo>> {
    let output = Command::new(program)
        .arg("--voices")
        .stdin(Stdio::null())
        .output()?;
    Ok(parse_voice_list(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse `--voices` output:
/// `Pty Language       Age/Gender VoiceName          File                 Other Languages`
pub fn parse_voice_list(listing: &str) -> Vec<VoiceInfo> {
    listing
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                return None;
            }
            let lang = fields[1].to_string();
            Some(VoiceInfo {
                id: fields[4].rsplit('/').next().unwrap_or(fields[4]).to_string(),
                name: fields[3].replace('_', " "),
                lang,
            })
        })
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Signal {
    Stop,
    Continue,
}

#[cfg(unix)]
fn signal_child(child: &Child, signal: Signal) -> bool {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return false;
    };
    let signal = match signal {
        Signal::Stop => libc::SIGSTOP,
        Signal::Continue => libc::SIGCONT,
    };
    // SAFETY: `pid` belongs to a child we own and have not yet reaped.
    unsafe { libc::kill(pid, signal) == 0 }
}

#[cfg(not(unix))]
fn signal_child(_child: &Child, _signal: Signal) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_scale_rate_and_volume() {
        assert_eq!(
            speech_args("en-us", 1.0, 1.0),
            vec!["-v", "en-us", "-s", "175", "-a", "100", "--stdin"]
        );
        let fast = speech_args("en", 2.0, 0.5);
        assert_eq!(fast[3], "350");
        assert_eq!(fast[5], "50");
    }

    #[test]
    fn parses_voice_listing() {
        let listing = "\
Pty Language       Age/Gender VoiceName          File                 Other Languages
 5  af              --/M      Afrikaans          gmw/af
 2  en-us           --/M      English_(America)  gmw/en-US            (en 3)
";
        let voices = parse_voice_list(listing);
        assert_eq!(voices.len(), 2);
        assert_eq!(voices[1].lang, "en-us");
        assert_eq!(voices[1].id, "en-US");
        assert_eq!(voices[1].name, "English (America)");
    }

    #[test]
    fn voice_errors_are_recognised() {
        assert_eq!(
            classify_failure(Some(1), "Voice 'xx' not found"),
            SpeechEvent::Error(SpeechErrorCode::VoiceUnavailable(
                "Voice 'xx' not found".into()
            ))
        );
        assert!(matches!(
            classify_failure(Some(2), ""),
            SpeechEvent::Error(SpeechErrorCode::SynthesisFailed(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn missing_program_is_reported_unavailable() {
        let facility = CommandSpeechFacility::new("/nonexistent/lanternleaf-speech");
        let (tx, rx) = std::sync::mpsc::channel();
        facility.speak(
            Utterance::new("hello", &Default::default()),
            Box::new(move |event| {
                let _ = tx.send(event);
            }),
        );
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(1)),
            Ok(SpeechEvent::Error(SpeechErrorCode::Unavailable(_)))
        ));
        assert!(facility.probe().is_err());
    }

    #[test]
    fn only_launch_failures_mark_the_facility_unavailable() {
        let missing = std::io::Error::from(ErrorKind::NotFound);
        assert!(matches!(
            spawn_error_code(&missing),
            SpeechErrorCode::Unavailable(_)
        ));
        let busy = std::io::Error::from(ErrorKind::WouldBlock);
        assert!(matches!(
            spawn_error_code(&busy),
            SpeechErrorCode::SynthesisFailed(_)
        ));
    }
}
