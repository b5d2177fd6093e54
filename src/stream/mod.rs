//! Streaming reply assembly
//!
//! `chunker` turns model deltas into client-sized flush units,
//! `sse` frames them for the `text/event-stream` wire format.

pub mod chunker;
pub mod sse;

pub use chunker::{ChunkBuffer, MAX_BUFFER_CHARS};
pub use sse::Frame;
