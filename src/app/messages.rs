/// Commands typed on the terminal, one per line.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    TogglePlayPause,
    Stop,
    PlayFrom(usize),
    SeekForward,
    SeekBackward,
    RestartCurrent,
    SpeedUp,
    SpeedDown,
    SetVoice(Option<String>),
    SetLang(String),
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  p | <space>   play / pause
  s             stop
  g <n>         play from unit n
  n | b         next / previous unit
  r             restart current unit
  + | -         faster / slower
  v [voice]     select voice (empty for the language default)
  l <lang>      select language
  h             this help
  q             quit";

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_message(line: &str) -> Result<Option<Message>, String> {
    // A lone space toggles playback, so only strip the line ending first.
    let line = line.trim_end_matches(['\r', '\n']);
    if line == " " {
        return Ok(Some(Message::TogglePlayPause));
    }
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    let message = match head {
        "p" | "play" | "pause" => Message::TogglePlayPause,
        "s" | "stop" => Message::Stop,
        "g" | "go" => {
            let ordinal = rest
                .parse::<usize>()
                .map_err(|_| format!("expected a unit number, got {rest:?}"))?;
            Message::PlayFrom(ordinal)
        }
        "n" | "next" => Message::SeekForward,
        "b" | "back" => Message::SeekBackward,
        "r" | "restart" => Message::RestartCurrent,
        "+" => Message::SpeedUp,
        "-" => Message::SpeedDown,
        "v" | "voice" => Message::SetVoice((!rest.is_empty()).then(|| rest.to_string())),
        "l" | "lang" => {
            if rest.is_empty() {
                return Err("expected a language code".to_string());
            }
            Message::SetLang(rest.to_string())
        }
        "h" | "help" | "?" => Message::Help,
        "q" | "quit" | "exit" => Message::Quit,
        other => return Err(format!("unknown command {other:?}; type h for help")),
    };
    Ok(Some(message))
}
