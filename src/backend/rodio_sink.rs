//! Audio sink on the default output device via rodio.
//!
//! `OutputStream` is not `Send`, so a dedicated thread owns the stream and the
//! current `Sink` and takes commands over a channel.

use super::generate::{AudioSink, DecodedAudio};
use crate::cancellation::CancellationToken;
use crate::error::NarrationError;
use once_cell::sync::OnceCell;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

enum SinkCommand {
    Play {
        audio: DecodedAudio,
        volume: f32,
        token: CancellationToken,
        done: oneshot::Sender<()>,
    },
    Pause,
    Resume,
    Stop,
}

pub struct RodioSink {
    poll_interval: Duration,
    commands: OnceCell<Sender<SinkCommand>>,
}

impl RodioSink {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(5)),
            commands: OnceCell::new(),
        }
    }

    fn send(&self, command: SinkCommand) {
        if let Some(commands) = self.commands.get() {
            if commands.send(command).is_err() {
                warn!("Audio output thread has exited");
            }
        }
    }

    fn open(&self) -> Result<Sender<SinkCommand>, NarrationError> {
        let (tx, rx) = mpsc::channel::<SinkCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        let poll = self.poll_interval;

        thread::Builder::new()
            .name("narration-audio".into())
            .spawn(move || {
                let (_stream, handle) = match OutputStream::try_default() {
                    Ok(opened) => opened,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                run_output(&handle, &rx, poll);
                debug!("Audio output thread exiting");
            })
            .map_err(|err| NarrationError::unavailable(format!("audio thread: {err}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("Opened default audio output");
                Ok(tx)
            }
            Ok(Err(err)) => Err(NarrationError::unavailable(format!(
                "opening audio output: {err}"
            ))),
            Err(_) => Err(NarrationError::unavailable("audio thread exited during startup")),
        }
    }
}

struct Playing {
    sink: Sink,
    token: CancellationToken,
    done: oneshot::Sender<()>,
}

fn run_output(handle: &OutputStreamHandle, rx: &mpsc::Receiver<SinkCommand>, poll: Duration) {
    let mut current: Option<Playing> = None;
    let mut paused = false;

    loop {
        match rx.recv_timeout(poll) {
            Ok(SinkCommand::Play {
                audio,
                volume,
                token,
                done,
            }) => {
                if let Some(previous) = current.take() {
                    previous.sink.stop();
                }
                if token.is_cancelled() {
                    debug!("Dropping playback for a cancelled session");
                    continue;
                }
                let sink = match Sink::try_new(handle) {
                    Ok(sink) => sink,
                    Err(err) => {
                        warn!("Failed to create audio sink: {err}");
                        continue;
                    }
                };
                sink.set_volume(volume);
                sink.append(SamplesBuffer::new(
                    audio.channels,
                    audio.sample_rate,
                    audio.samples,
                ));
                if paused {
                    sink.pause();
                } else {
                    sink.play();
                }
                current = Some(Playing { sink, token, done });
            }
            Ok(SinkCommand::Pause) => {
                paused = true;
                if let Some(playing) = current.as_ref() {
                    playing.sink.pause();
                }
            }
            Ok(SinkCommand::Resume) => {
                paused = false;
                if let Some(playing) = current.as_ref() {
                    playing.sink.play();
                }
            }
            Ok(SinkCommand::Stop) => {
                paused = false;
                if let Some(playing) = current.take() {
                    playing.sink.stop();
                    debug!("Stopped audio output");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let finished = current
            .as_ref()
            .is_some_and(|playing| playing.sink.empty() || playing.token.is_cancelled());
        if finished {
            if let Some(playing) = current.take() {
                if playing.token.is_cancelled() {
                    playing.sink.stop();
                } else {
                    let _ = playing.done.send(());
                }
            }
        }
    }
}

impl AudioSink for RodioSink {
    fn ensure_active(&self) -> Result<(), NarrationError> {
        self.commands.get_or_try_init(|| self.open()).map(|_| ())
    }

    fn is_active(&self) -> bool {
        self.commands.get().is_some()
    }

    fn start(
        &self,
        audio: DecodedAudio,
        volume: f32,
        token: &CancellationToken,
    ) -> Result<oneshot::Receiver<()>, NarrationError> {
        let commands = self
            .commands
            .get()
            .ok_or_else(|| NarrationError::unavailable("audio output is not active"))?;
        let (done, finished) = oneshot::channel();
        commands
            .send(SinkCommand::Play {
                audio,
                volume,
                token: token.clone(),
                done,
            })
            .map_err(|_| NarrationError::playback("audio output thread has exited"))?;
        Ok(finished)
    }

    fn pause(&self) {
        self.send(SinkCommand::Pause);
    }

    fn resume(&self) {
        self.send(SinkCommand::Resume);
    }

    fn stop(&self) {
        self.send(SinkCommand::Stop);
    }
}
