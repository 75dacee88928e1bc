//! Storage infrastructure: configuration file loading.
//!
//! The server persists no chat history and no files; the only thing it reads
//! from disk is its TOML configuration.

pub mod config;
