//! Piper synthesis in a helper process.
//!
//! The main binary re-executes itself with `--tts-worker`; requests and
//! responses travel as JSON lines over stdin/stdout. Running synthesis out of
//! process keeps the ONNX runtime off the narration runtime and lets an
//! abandoned request be dropped by killing the worker.

use super::generate::AudioGenerator;
use crate::error::NarrationError;
use crate::narration::state::VoiceSettings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize, Deserialize)]
struct WorkerRequest {
    text: Option<String>,
    path: Option<String>,
    #[serde(default)]
    speed: Option<f32>,
    #[serde(default)]
    shutdown: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WorkerResponse {
    ok: bool,
    error: Option<String>,
}

/// Run the worker loop if this process was started as a TTS worker.
pub fn maybe_run_worker() -> bool {
    if env::args().any(|arg| arg == "--tts-worker") {
        if let Err(err) = run_worker() {
            eprintln!("tts-worker error: {err}");
        }
        return true;
    }
    false
}

fn run_worker() -> anyhow::Result<()> {
    use std::io::{BufRead, BufReader, Write};

    let mut args = env::args().skip_while(|arg| arg != "--tts-worker");
    let _ = args.next();

    let mut model_path: Option<PathBuf> = None;
    let mut espeak_root: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--model" => model_path = args.next().map(PathBuf::from),
            "--espeak" => espeak_root = args.next().map(PathBuf::from),
            _ => {}
        }
    }

    let model_path = model_path.ok_or_else(|| anyhow::anyhow!("Missing --model argument"))?;
    let espeak_root = espeak_root.ok_or_else(|| anyhow::anyhow!("Missing --espeak argument"))?;
    let synth = piper::Synth::load(&model_path, &sanitize_espeak_root(espeak_root))?;

    let stdin = std::io::stdin();
    let mut reader = BufReader::new(stdin.lock());
    let mut line = String::new();
    let mut stdout = std::io::stdout();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let req: WorkerRequest = serde_json::from_str(line.trim())
            .map_err(|err| anyhow::anyhow!("Invalid request: {err}"))?;
        if req.shutdown.unwrap_or(false) {
            break;
        }

        let result = match (req.text, req.path) {
            (Some(text), Some(path)) => {
                synth.synthesize_to_file(Path::new(&path), &text, req.speed.unwrap_or(1.0))
            }
            _ => Err(anyhow::anyhow!("Invalid request payload")),
        };
        let response = match result {
            Ok(()) => WorkerResponse {
                ok: true,
                error: None,
            },
            Err(err) => WorkerResponse {
                ok: false,
                error: Some(err.to_string()),
            },
        };
        let payload = serde_json::to_string(&response)?;
        stdout.write_all(payload.as_bytes())?;
        stdout.write_all(b"\n")?;
        stdout.flush()?;
    }

    Ok(())
}

/// Piper expects the directory that contains `espeak-ng-data`, not the data
/// directory itself.
pub fn sanitize_espeak_root(path: PathBuf) -> PathBuf {
    if path.file_name().is_some_and(|n| n == "espeak-ng-data") {
        if let Some(parent) = path.parent() {
            return parent.to_path_buf();
        }
    }
    path
}

pub fn resolve_piper_config(model_path: &Path) -> PathBuf {
    if model_path.extension().is_some_and(|ext| ext == "onnx") {
        return model_path.with_extension("onnx.json");
    }
    model_path.to_path_buf()
}

/// Map a speed multiplier onto Piper's 0..=100 rate scale.
pub fn speed_to_rate_percent(speed: f32) -> u8 {
    let clamped = speed.clamp(0.5, 5.5);
    let percent = ((clamped - 0.5) / 5.0) * 100.0;
    percent.round().clamp(0.0, 100.0) as u8
}

#[cfg(feature = "piper")]
mod piper {
    use super::{resolve_piper_config, speed_to_rate_percent};
    use crate::backend::generate::encode_wav;
    use piper_rs::from_config_path;
    use piper_rs::synth::{AudioOutputConfig, PiperSpeechSynthesizer};
    use std::env;
    use std::path::Path;

    pub struct Synth {
        piper: PiperSpeechSynthesizer,
    }

    impl Synth {
        pub fn load(model_path: &Path, espeak_root: &Path) -> anyhow::Result<Self> {
            if env::var_os("PIPER_ESPEAKNG_DATA_DIRECTORY").is_none() {
                // Safe because the worker sets this before spawning any threads.
                unsafe {
                    env::set_var("PIPER_ESPEAKNG_DATA_DIRECTORY", espeak_root);
                }
            }
            let config_path = resolve_piper_config(model_path);
            if !config_path.exists() {
                anyhow::bail!(
                    "Piper config not found at {} (expected from {})",
                    config_path.display(),
                    model_path.display()
                );
            }
            let model = from_config_path(&config_path)?;
            Ok(Self {
                piper: PiperSpeechSynthesizer::new(model)?,
            })
        }

        pub fn synthesize_to_file(&self, path: &Path, text: &str, speed: f32) -> anyhow::Result<()> {
            let output_config = if (speed - 1.0).abs() <= f32::EPSILON {
                None
            } else {
                Some(AudioOutputConfig {
                    rate: Some(speed_to_rate_percent(speed)),
                    volume: None,
                    pitch: None,
                    appended_silence_ms: None,
                })
            };
            let mut samples: Vec<f32> = Vec::new();
            let mut format: Option<(u32, u16)> = None;
            for chunk in self.piper.synthesize_lazy(text.to_string(), output_config)? {
                let chunk = chunk?;
                format.get_or_insert((chunk.info.sample_rate as u32, chunk.info.num_channels as u16));
                samples.extend_from_slice(chunk.samples.as_slice());
            }
            if samples.is_empty() {
                anyhow::bail!("No speech data to write");
            }
            let (rate, channels) = format.unwrap_or((22_050, 1));
            let bytes = encode_wav(rate, channels, &samples)?;
            std::fs::write(path, bytes)?;
            Ok(())
        }
    }
}

#[cfg(not(feature = "piper"))]
mod piper {
    use std::path::Path;

    pub struct Synth;

    impl Synth {
        pub fn load(_model_path: &Path, _espeak_root: &Path) -> anyhow::Result<Self> {
            anyhow::bail!("this build has no Piper support; rebuild with --features piper")
        }

        pub fn synthesize_to_file(&self, _path: &Path, _text: &str, _speed: f32) -> anyhow::Result<()> {
            anyhow::bail!("this build has no Piper support")
        }
    }
}

struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    /// Output path of the request in flight. Still set on entry means the
    /// last caller was dropped mid-request and the reply stream is out of step.
    in_flight: Option<PathBuf>,
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
        if let Some(path) = self.in_flight.take() {
            debug!(path = %path.display(), "Removing scratch output of abandoned request");
            let _ = std::fs::remove_file(&path);
        }
    }
}

/// Generator that talks to a `--tts-worker` child process.
pub struct WorkerGenerator {
    program: PathBuf,
    model_path: PathBuf,
    espeak_path: PathBuf,
    scratch_dir: PathBuf,
    process: Mutex<Option<WorkerProcess>>,
    seq: AtomicU64,
    id: String,
}

impl WorkerGenerator {
    pub fn new(model_path: PathBuf, espeak_path: PathBuf, scratch_dir: PathBuf) -> anyhow::Result<Self> {
        let program = env::current_exe()?;
        let id = format!("piper:{}", model_path.display());
        info!(
            model = %model_path.display(),
            espeak_root = %espeak_path.display(),
            "Configured Piper worker generator"
        );
        Ok(Self {
            program,
            model_path,
            espeak_path,
            scratch_dir,
            process: Mutex::new(None),
            seq: AtomicU64::new(0),
            id,
        })
    }

    fn spawn(&self) -> Result<WorkerProcess, NarrationError> {
        let mut child = Command::new(&self.program)
            .arg("--tts-worker")
            .arg("--model")
            .arg(&self.model_path)
            .arg("--espeak")
            .arg(&self.espeak_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| NarrationError::unavailable(format!("failed to start TTS worker: {err}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| NarrationError::unavailable("TTS worker has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| NarrationError::unavailable("TTS worker has no stdout"))?;
        info!(pid = child.id(), "Spawned TTS worker");
        Ok(WorkerProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            in_flight: None,
        })
    }

    async fn request(
        worker: &mut WorkerProcess,
        req: &WorkerRequest,
        path: &Path,
    ) -> Result<WorkerResponse, NarrationError> {
        let mut payload = serde_json::to_string(req)
            .map_err(|err| NarrationError::generation(err.to_string()))?;
        payload.push('\n');
        worker.in_flight = Some(path.to_path_buf());
        worker
            .stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|err| NarrationError::generation(format!("TTS worker write failed: {err}")))?;
        worker
            .stdin
            .flush()
            .await
            .map_err(|err| NarrationError::generation(format!("TTS worker write failed: {err}")))?;
        let line = worker
            .stdout
            .next_line()
            .await
            .map_err(|err| NarrationError::generation(format!("TTS worker read failed: {err}")))?
            .ok_or_else(|| NarrationError::unavailable("TTS worker exited"))?;
        worker.in_flight = None;
        serde_json::from_str(&line)
            .map_err(|err| NarrationError::generation(format!("bad TTS worker reply: {err}")))
    }
}

#[async_trait]
impl AudioGenerator for WorkerGenerator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, text: &str, voice: &VoiceSettings) -> Result<Vec<u8>, NarrationError> {
        let mut guard = self.process.lock().await;
        if let Some(stale) = guard.take_if(|worker| worker.in_flight.is_some()) {
            warn!("Discarding TTS worker with an abandoned request");
            drop(stale);
        }
        if guard.is_none() {
            *guard = Some(self.spawn()?);
        }
        let Some(worker) = guard.as_mut() else {
            return Err(NarrationError::unavailable("TTS worker not running"));
        };

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|err| NarrationError::generation(format!("creating scratch dir: {err}")))?;
        let nonce = self.seq.fetch_add(1, Ordering::Relaxed);
        let path = self
            .scratch_dir
            .join(format!("worker-{}-{nonce}.wav", std::process::id()));
        let req = WorkerRequest {
            text: Some(text.to_string()),
            path: Some(path.to_string_lossy().into_owned()),
            speed: Some(voice.speed),
            shutdown: None,
        };
        debug!(chars = text.len(), path = %path.display(), "Sending request to TTS worker");

        let response = match Self::request(worker, &req, &path).await {
            Ok(response) => response,
            Err(err) => {
                // The worker is unusable after a transport failure.
                guard.take();
                return Err(err);
            }
        };
        if !response.ok {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(NarrationError::generation(
                response.error.unwrap_or_else(|| "TTS worker failed".to_string()),
            ));
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|err| NarrationError::generation(format!("reading worker output: {err}")));
        let _ = tokio::fs::remove_file(&path).await;
        bytes
    }
}
