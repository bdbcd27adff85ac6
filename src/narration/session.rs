use super::controller::Shared;
use super::state::{Chunk, VoiceSettings};
use crate::backend::{ChunkOutcome, PauseGate};
use crate::cancellation::CancellationToken;
use crate::chunker::chunk;
use crate::document::Document;
use crate::error::NarrationError;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything a session task needs, captured when it was started.
pub(crate) struct SessionPlan {
    pub id: u64,
    pub start: usize,
    pub document: Arc<Document>,
    pub voice: VoiceSettings,
    pub token: CancellationToken,
    pub pause: PauseGate,
}

/// Drive one session: walk units from `plan.start`, chunk each one and hand
/// chunks to the backend strictly one at a time.
pub(crate) async fn run_session(shared: Arc<Shared>, plan: SessionPlan) {
    let SessionPlan {
        id,
        start,
        document,
        voice,
        token,
        pause,
    } = plan;

    if document.is_empty() {
        shared.finish_fatal(id, NarrationError::EmptyDocument);
        return;
    }

    // Readiness checks may block on external programs.
    let ready = {
        let shared = Arc::clone(&shared);
        let voice = voice.clone();
        tokio::task::spawn_blocking(move || {
            shared
                .backend
                .check_ready()
                .and_then(|_| shared.backend.check_voice(&voice))
        })
        .await
        .unwrap_or_else(|err| Err(NarrationError::unavailable(err.to_string())))
    };
    if token.is_cancelled() {
        return;
    }
    if let Err(err) = ready {
        shared.finish_fatal(id, err);
        return;
    }

    for unit in document.units().iter().skip(start) {
        if token.is_cancelled() {
            return;
        }
        if unit.is_blank() {
            debug!(session = id, ordinal = unit.ordinal, "Skipping blank unit");
            continue;
        }

        let pieces = chunk(&unit.text, shared.max_chunk_len);
        debug!(
            session = id,
            ordinal = unit.ordinal,
            chunks = pieces.len(),
            "Narrating unit"
        );

        for (idx, text) in pieces.into_iter().enumerate() {
            if token.is_cancelled() {
                return;
            }
            if idx == 0 && !shared.enter_generating(id) {
                return;
            }

            let piece = Chunk {
                text,
                source_ordinal: unit.ordinal,
            };
            let ctx = shared.chunk_context(id, &token, &pause);
            let outcome = shared
                .backend
                .synthesize_and_play(&piece, &voice, &ctx)
                .await;

            if token.is_cancelled() {
                debug!(session = id, "Chunk outcome ignored after abort");
                return;
            }

            match outcome {
                ChunkOutcome::Completed => {
                    if !shared.advance(id, piece.source_ordinal) {
                        return;
                    }
                }
                ChunkOutcome::Aborted => return,
                ChunkOutcome::Failed(err) if err.is_fatal() => {
                    shared.finish_fatal(id, err);
                    return;
                }
                ChunkOutcome::Failed(err) => {
                    warn!(
                        session = id,
                        ordinal = piece.source_ordinal,
                        "Chunk failed, continuing: {err}"
                    );
                    shared.report_chunk_error(id, err);
                }
            }
        }
    }

    shared.finish_natural(id);
}
