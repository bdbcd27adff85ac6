//! Entry point for the terminal narrator.
//!
//! Responsibilities here are intentionally minimal:
//! - Hand off to the TTS worker loop when started with `--tts-worker`.
//! - Parse command-line arguments.
//! - Load configuration, per-document overrides and the bookmark.
//! - Build the configured backend and run the command loop.

use anyhow::{Context, Result, anyhow};
use lanternleaf_narrator::app::{App, ConsoleObserver, run_app};
use lanternleaf_narrator::backend::NarrationBackend;
use lanternleaf_narrator::backend::generate::{AudioGenerator, AudioSink, GenerateThenPlayBackend};
use lanternleaf_narrator::backend::generators::{CachedGenerator, CommandGenerator};
use lanternleaf_narrator::backend::speech::{DirectSpeechBackend, SpeechFacility};
use lanternleaf_narrator::backend::speech_command::CommandSpeechFacility;
use lanternleaf_narrator::backend::worker::{WorkerGenerator, maybe_run_worker};
use lanternleaf_narrator::cache::{audio_cache_dir, hash_dir, load_bookmark, load_narration_settings};
use lanternleaf_narrator::config::{BackendKind, NarratorConfig, load_config};
use lanternleaf_narrator::document::load_text_document;
use lanternleaf_narrator::narration::{NarrationController, NarrationOptions};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

struct Args {
    doc_path: PathBuf,
    from: Option<usize>,
}

fn main() {
    if maybe_run_worker() {
        return;
    }
    let reload_handle = init_tracing();
    if let Err(err) = run(&reload_handle) {
        error!("{err:?}");
        std::process::exit(1);
    }
}

fn run(reload_handle: &ReloadHandle) -> Result<()> {
    let args = parse_args()?;
    let config = load_config(Path::new("conf/config.toml"));
    set_log_level(reload_handle, config.log_level.as_filter_str());
    info!(
        path = %args.doc_path.display(),
        level = %config.log_level,
        backend = %config.backend,
        "Starting narrator"
    );

    let cache_root = config.cache_root();
    let mut voice = config.voice_settings();
    if let Some(overrides) = load_narration_settings(&cache_root, &args.doc_path) {
        info!("Loaded per-document narration settings from cache");
        voice = overrides;
    }
    let bookmark = load_bookmark(&cache_root, &args.doc_path);
    if let Some(ordinal) = bookmark {
        info!(ordinal, "Resuming from cached position");
    }

    let document = Arc::new(
        load_text_document(&args.doc_path, config.lines_per_page)
            .context("Failed to load document text")?,
    );

    // Sessions run as tasks on this runtime. A pending stdin read holds a
    // blocking thread, so shutdown uses a timeout instead of waiting on it.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let backend = build_backend(&config, &cache_root, &args.doc_path)?;
    let observer = Arc::new(ConsoleObserver::new(
        cache_root.clone(),
        args.doc_path.clone(),
    ));
    let controller = NarrationController::new(
        runtime.handle().clone(),
        backend,
        observer,
        NarrationOptions {
            max_chunk_len: config.max_chunk_len,
            voice,
        },
    );
    controller.load_document(document);
    if let Some(ordinal) = args.from.or(bookmark) {
        controller.seek_to(ordinal);
    }

    // Launching the narrator is the user action that may open audio output.
    if let Err(err) = controller.ensure_audio_active() {
        warn!("Audio output unavailable: {err}");
        eprintln!("warning: {err}");
    }

    let app = App::new(controller, cache_root, args.doc_path);
    let result = runtime.block_on(run_app(app));
    runtime.shutdown_timeout(Duration::from_millis(250));
    result
}

fn build_backend(
    config: &NarratorConfig,
    cache_root: &Path,
    doc_path: &Path,
) -> Result<Arc<dyn NarrationBackend>> {
    match config.backend {
        BackendKind::Speech => {
            let facility = CommandSpeechFacility::new(config.speech_command.clone());
            if let Err(err) = facility.probe() {
                warn!(program = %config.speech_command, "Speech program not runnable: {err}");
            }
            Ok(Arc::new(DirectSpeechBackend::new(Arc::new(facility))))
        }
        BackendKind::Generate => {
            let generator: Arc<dyn AudioGenerator> = if config.generate_command.is_empty() {
                Arc::new(WorkerGenerator::new(
                    PathBuf::from(&config.tts_model_path),
                    PathBuf::from(&config.tts_espeak_path),
                    hash_dir(cache_root, doc_path).join("worker"),
                )?)
            } else {
                Arc::new(CommandGenerator::new(config.generate_command.clone())?)
            };
            let generator: Arc<dyn AudioGenerator> = if config.audio_cache {
                Arc::new(CachedGenerator::new(
                    generator,
                    audio_cache_dir(cache_root, doc_path),
                ))
            } else {
                generator
            };
            let sink = build_sink(config)?;
            Ok(Arc::new(GenerateThenPlayBackend::new(generator, sink)))
        }
    }
}

#[cfg(feature = "audio")]
fn build_sink(config: &NarratorConfig) -> Result<Arc<dyn AudioSink>> {
    use lanternleaf_narrator::backend::rodio_sink::RodioSink;
    Ok(Arc::new(RodioSink::new(config.sink_poll_interval())))
}

#[cfg(not(feature = "audio"))]
fn build_sink(_config: &NarratorConfig) -> Result<Arc<dyn AudioSink>> {
    Err(anyhow!(
        "the generate backend needs audio output; rebuild with --features audio"
    ))
}

fn parse_args() -> Result<Args> {
    const USAGE: &str = "Usage: lanternleaf-narrator <text-file> [--from <unit>]";
    let mut args = env::args().skip(1);
    let mut doc_path: Option<PathBuf> = None;
    let mut from: Option<usize> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--from" => {
                let value = args.next().ok_or_else(|| anyhow!(USAGE))?;
                from = Some(
                    value
                        .parse()
                        .with_context(|| format!("Invalid unit number: {value}"))?,
                );
            }
            "-h" | "--help" => return Err(anyhow!(USAGE)),
            _ if doc_path.is_none() => doc_path = Some(PathBuf::from(&arg)),
            other => return Err(anyhow!("Unexpected argument {other}\n{USAGE}")),
        }
    }

    let doc_path = doc_path.ok_or_else(|| anyhow!(USAGE))?;
    if !doc_path.exists() {
        return Err(anyhow!("File not found: {}", doc_path.display()));
    }
    Ok(Args { doc_path, from })
}

fn init_tracing() -> ReloadHandle {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let (filter_layer, handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter_layer),
        )
        .init();
    handle
}

fn set_log_level(handle: &ReloadHandle, level: &str) {
    if env::var_os("RUST_LOG").is_some() {
        info!("RUST_LOG is set; ignoring config log level");
        return;
    }
    let parsed = EnvFilter::builder()
        .parse(level)
        .unwrap_or_else(|_| EnvFilter::new("debug"));
    if let Err(err) = handle.modify(|filter| *filter = parsed.clone()) {
        warn!(%level, "Failed to update log level from config: {err}");
    } else {
        info!(%level, "Applied log level from config");
    }
}
