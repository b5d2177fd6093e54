//! Reply relay
//!
//! Information Hiding:
//! - Runs the model stream and the chunk buffer side by side in one task
//! - Each flush unit is handed to the client channel before the next delta is read
//! - The assembled reply is persisted once, after the model stream ends

use crate::core::{ModelRequest, ModelRuntime};
use crate::storage::{ConversationStore, Message};
use crate::stream::{ChunkBuffer, Frame};
use std::sync::Arc;
use tokio::sync::mpsc;

const DELTA_CHANNEL_CAPACITY: usize = 32;

/// Frames of one streamed reply, in delivery order, ending with [`Frame::Done`].
#[derive(Debug)]
pub struct ReplyStream {
    pub chat_id: String,
    pub frames: mpsc::Receiver<Frame>,
}

impl ReplyStream {
    /// Drain every frame. Mostly useful outside HTTP (CLI, tests).
    pub async fn collect(mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.frames.recv().await {
            frames.push(frame);
        }
        frames
    }
}

pub(crate) struct RelayJob {
    pub runtime: Arc<dyn ModelRuntime>,
    pub conversations: Arc<dyn ConversationStore>,
    pub chat_id: String,
    pub request: ModelRequest,
    pub max_buffer_chars: usize,
    pub channel_capacity: usize,
}

/// Start relaying a reply in the background. The task runs to completion
/// even if the receiving side goes away, so the reply is still persisted.
pub(crate) fn spawn_reply(job: RelayJob) -> ReplyStream {
    let (frame_tx, frame_rx) = mpsc::channel(job.channel_capacity.max(1));
    let chat_id = job.chat_id.clone();
    tokio::spawn(relay(job, frame_tx));
    ReplyStream {
        chat_id,
        frames: frame_rx,
    }
}

struct Outbox {
    frames: mpsc::Sender<Frame>,
    client_gone: bool,
}

impl Outbox {
    async fn deliver(&mut self, chat_id: &str, frame: Frame) {
        if self.client_gone {
            return;
        }
        if self.frames.send(frame).await.is_err() {
            tracing::debug!(
                "[ChunkRelay] Client for '{}' disconnected, continuing without delivery",
                chat_id
            );
            self.client_gone = true;
        }
    }
}

async fn relay(job: RelayJob, frames: mpsc::Sender<Frame>) {
    let RelayJob {
        runtime,
        conversations,
        chat_id,
        request,
        max_buffer_chars,
        ..
    } = job;

    let mut outbox = Outbox {
        frames,
        client_gone: false,
    };
    let (delta_tx, mut delta_rx) = mpsc::channel::<String>(DELTA_CHANNEL_CAPACITY);

    let consume = async {
        let mut buffer = ChunkBuffer::with_max_chars(max_buffer_chars);
        let mut units = 0usize;
        while let Some(delta) = delta_rx.recv().await {
            if let Some(unit) = buffer.push(&delta) {
                units += 1;
                outbox.deliver(&chat_id, Frame::Chunk(unit)).await;
            }
        }
        (buffer, units)
    };

    let (outcome, (buffer, mut units)) =
        tokio::join!(runtime.stream_complete(request, delta_tx), consume);

    let (tail, full) = buffer.finish();
    if let Some(unit) = tail {
        units += 1;
        outbox.deliver(&chat_id, Frame::Chunk(unit)).await;
    }

    let model_error = outcome.err();
    if let Some(e) = &model_error {
        tracing::error!(
            "[ChunkRelay] Model stream for '{}' failed after {} chars: {}",
            chat_id,
            full.len(),
            e
        );
    }

    // A failed stream that produced nothing leaves no assistant message behind.
    if model_error.is_none() || !full.is_empty() {
        let length = full.len();
        match conversations
            .append(&chat_id, Message::assistant(full), None)
            .await
        {
            Ok(_) => tracing::info!(
                "[ChunkRelay] Stored reply for '{}' ({} units, {} chars)",
                chat_id,
                units,
                length
            ),
            Err(e) => {
                tracing::error!(
                    "[ChunkRelay] Failed to store reply for '{}' ({} chars): {}",
                    chat_id,
                    length,
                    e
                );
                outbox
                    .deliver(&chat_id, Frame::Error(format!("Failed to save response: {}", e)))
                    .await;
            }
        }
    }

    if let Some(e) = model_error {
        outbox
            .deliver(&chat_id, Frame::Error(format!("Model stream failed: {}", e)))
            .await;
    }

    outbox.deliver(&chat_id, Frame::Done).await;
}
