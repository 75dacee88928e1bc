//! Storage infrastructure: received files and configuration loading.

pub mod config;
pub mod received_files;
