//! FACT: a query-serving runtime that answers natural-language questions by
//! orchestrating an LLM with a pool of sandboxed tools (chiefly a read-only
//! SQL executor), backed by a resilient, admission-gated response cache.
//!
//! This crate is the core request pipeline only — the LLM provider, the
//! remote tool gateway, and any interactive surface are external
//! collaborators consumed through traits (`pipeline::llm::LlmClient`,
//! `pipeline::gateway::ToolGateway`).

pub mod cache;
pub mod circuit;
pub mod config;
pub mod core;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod tools;

pub use core::Core;
pub use error::{ErrorKind, FactError};
