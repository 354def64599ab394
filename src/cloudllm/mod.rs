// src/cloudllm/mod.rs
//
// Provider-agnostic LLM plumbing: message/role types, the `ClientWrapper` trait, concrete
// provider wrappers, runtime configuration, and the per-base-URL HTTP connection pool. The
// orchestrator (`crate::orchestrator`) is built on top of this layer.

pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod http_client_pool;
