//! The streaming AI-skill orchestrator built on top of `crate::cloudllm`.
//!
//! Module layout mirrors the component breakdown: a bounded tool-calling loop drains a
//! classified chunk stream through a paragraph aggregator and code-block extractor, dispatches
//! resolved tool calls to app skills, turns results into encrypted embeds, and publishes events
//! and billing charges along the way. [`stream_consumer`] is the session entry point that wires
//! all of it together.

pub mod billing;
pub mod chunk_aggregator;
pub mod code_block;
pub mod collaborators;
pub mod content_hash;
pub mod embed_service;
pub mod errors;
pub mod event_publisher;
pub mod focus_mode;
pub mod session;
pub mod skill_dispatcher;
pub mod stream_consumer;
pub mod tool_loop;
pub mod tool_resolver;
pub mod toon;
pub mod url_validator;
