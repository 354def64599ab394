// src/lib.rs

// Provider-agnostic LLM plumbing (messages, client trait, config, HTTP pool).
pub mod cloudllm;

// The streaming AI-skill orchestrator built on top of `cloudllm`.
pub mod orchestrator;

// Re-exporting key items for easier external access.
pub use cloudllm::client_wrapper::{ClientWrapper, Message, Role};
pub use orchestrator::session::Session;
pub use orchestrator::stream_consumer::run_session;
