//! Backup Core Library
//!
//! Encrypted, compressed, checksummed backups of the print-shop platform:
//! database dump, media file tree and configuration export, plus restore,
//! versioning, retention and a round-trip test harness.

pub mod config;
pub mod engine;
pub mod harness;
pub mod locks;
pub mod models;
pub mod monitoring;
pub mod pipeline;
pub mod restore;
pub mod service;
pub mod store;
pub mod tools;
pub mod utils;
pub mod versioning;

// Re-export commonly used types
pub use config::BackupConfig;
pub use service::BackupService;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
