//! Safe Rust wrapper around the chatglm.cpp inference engine.
//!
//! Provides an RAII-managed [`Pipeline`] for model loading, chat and
//! text generation, tokenization, and embedding extraction, plus the
//! [`TextStreamer`] that turns the engine's raw token stream into
//! printable UTF-8 fragments.
//!
//! The engine itself is an external native dependency; everything that
//! touches it lives behind the `native` cargo feature so the pure-Rust
//! surface (config, chat types, streamer) builds without a checkout.

pub mod chat;
pub mod config;
pub mod error;
#[cfg(feature = "native")]
pub mod pipeline;
pub mod stream;

pub use chat::{ChatMessage, CodeCall, DELIMITER, FunctionCall, Role, ToolCall};
pub use config::GenerationConfig;
pub use error::{ChatGlmError, Result};
#[cfg(feature = "native")]
pub use pipeline::Pipeline;
pub use stream::{ChannelSink, CollectSink, StreamSink, TextStreamer, TokenDecoder};
