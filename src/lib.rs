//! chatbridge - bridges a chat UI-automation feed to a multimodal
//! chat-completion API.
//!
//! Incoming text/image/video events are buffered, drained on a fixed
//! interval, assembled into one multimodal request in arrival order, and
//! the reply is appended to a running conversation transcript.

#![forbid(unsafe_code)]

/// Chat-completion API seam and HTTP implementation
pub mod client;
/// Startup configuration
pub mod config;
/// The time-windowed aggregation/dispatch loop
pub mod dispatcher;
/// Crate error type
pub mod error;
/// Events and the shared listener/dispatcher buffer
pub mod events;
/// Video keyframe extraction
pub mod frames;
/// Stdin line-protocol event source
pub mod listener;
/// Image downscaling and base64 JPEG encoding
pub mod media;
/// Conversation transcript and message wire types
pub mod transcript;
