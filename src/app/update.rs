use super::messages::{HELP, Message};
use crate::cache::save_narration_settings;
use crate::narration::NarrationController;
use std::path::PathBuf;
use tracing::{debug, info};

const SPEED_STEP: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Terminal front end state around one controller and document.
pub struct App {
    pub(super) controller: NarrationController,
    cache_root: PathBuf,
    doc_path: PathBuf,
}

impl App {
    pub fn new(controller: NarrationController, cache_root: PathBuf, doc_path: PathBuf) -> Self {
        Self {
            controller,
            cache_root,
            doc_path,
        }
    }

    pub fn update(&mut self, message: Message) -> Flow {
        debug!(?message, "Handling command");
        match message {
            Message::TogglePlayPause => self.controller.toggle_play_pause(),
            Message::Stop => self.controller.stop(),
            Message::PlayFrom(ordinal) => {
                let units = self.controller.document().len();
                if ordinal >= units {
                    println!("unit {ordinal} is past the end ({units} units)");
                } else {
                    self.controller.play_from(ordinal);
                }
            }
            Message::SeekForward => self.controller.seek_next(),
            Message::SeekBackward => self.controller.seek_previous(),
            Message::RestartCurrent => self.controller.restart(),
            Message::SpeedUp | Message::SpeedDown => {
                let step = if message == Message::SpeedUp {
                    SPEED_STEP
                } else {
                    -SPEED_STEP
                };
                let current = self.controller.voice_settings().speed;
                let speed = self.controller.set_speed(current + step);
                println!("speed {speed:.2}x");
                self.voice_changed();
            }
            Message::SetVoice(voice) => {
                self.controller.set_voice(voice);
                self.voice_changed();
            }
            Message::SetLang(lang) => {
                self.controller.set_lang(lang);
                self.voice_changed();
            }
            Message::Help => println!("{HELP}"),
            Message::Quit => {
                self.shutdown();
                return Flow::Quit;
            }
        }
        Flow::Continue
    }

    /// Persist settings and restart a live session so the change is heard
    /// from the current unit.
    fn voice_changed(&self) {
        let settings = self.controller.voice_settings();
        save_narration_settings(&self.cache_root, &self.doc_path, &settings);
        if self.controller.is_live() {
            self.controller.restart();
        }
    }

    pub fn shutdown(&self) {
        self.controller.stop();
        let ordinal = self.controller.current_ordinal();
        crate::cache::save_bookmark(&self.cache_root, &self.doc_path, ordinal);
        save_narration_settings(
            &self.cache_root,
            &self.doc_path,
            &self.controller.voice_settings(),
        );
        info!(ordinal, "Saved narration state");
    }
}
