//! Integration tests for toolhost
//!
//! The registry tests spawn the `echo-mcp` fixture binary built alongside
//! this crate and need nothing else.
//!
//! Tests marked `#[ignore]` need a local Ollama install:
//! cargo test --test integration -- --include-ignored
//!
//! Test structure:
//! - registry: loading, resolution, env overlay, tool filters, bulk load
//! - backend: controller behaviour against a fake or real server

#[path = "integration/registry.rs"]
mod registry;

#[path = "integration/backend.rs"]
mod backend;
