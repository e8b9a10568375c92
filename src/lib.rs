//! Chatlog - Read-only access to a desktop chat client's local storage
//!
//! A Rust library for querying the sharded SQLite files a desktop chat client
//! keeps on disk, while the client is still running and rewriting them.
//!
//! # Features
//!
//! - Lazy, path-keyed connection cache with watcher-driven invalidation
//! - Decoders for three storage generations producing one canonical message shape
//! - Fan-out queries with globally ordered, merged pagination
//! - Contact, chat room, session and media lookups

/// Configuration management
pub mod config;
/// Per-variant row sources
pub mod datasource;
/// Shard connection cache
pub mod db;
/// Row decoders
pub mod decoder;
/// Error types
pub mod error;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Query orchestration across shards
pub mod repository;
/// Storage schema definitions
pub mod schema;
/// Session facade
pub mod service;
/// Input validation and sanitization
pub mod validation;
/// Filesystem watching
pub mod watcher;

// Re-export key components for easier access
pub use config::AppConfig;
pub use error::{ChatlogError, Result};
pub use models::{ChatRoom, Contact, Media, MediaKind, Message, MessageQuery, Platform, Session, StorageVariant, TimeRange};
pub use service::{ChatlogDb, ChatlogQuery, QueryLimits};
