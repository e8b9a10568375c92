//! Session facade.
//!
//! [`ChatlogDb`] wires one data directory together: it selects the storage variant,
//! registers the variant's file groups with the connection cache, starts the
//! watcher and exposes the query surface. [`ChatlogQuery`] is the async view of the
//! same surface for callers running on tokio; queries run on the blocking pool.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::config::AppConfig;
use crate::datasource::for_variant;
use crate::db::{DbManager, OpenOptions};
use crate::error::{ChatlogError, Result};
use crate::models::{ChatRoom, Contact, Media, MediaKind, Message, MessageQuery, Platform, Session, StorageVariant};
use crate::repository::ChatlogRepository;
use crate::validation::InputValidator;
use crate::watcher::GroupCallback;

/// Result limits applied to every query
#[derive(Debug, Clone, Copy)]
pub struct QueryLimits {
    /// Used when the caller passes 0
    pub default_limit: usize,
    /// Upper bound for any limit
    pub max_limit: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_limit: 0,
            max_limit: 100_000,
        }
    }
}

impl QueryLimits {
    /// Effective limit for a request; 0 stays unlimited only without a default
    pub fn resolve(&self, limit: usize) -> Result<usize> {
        let limit = if limit == 0 { self.default_limit } else { limit };
        InputValidator::validate_limit(limit, self.max_limit)?;
        Ok(limit)
    }
}

/// One open chat data directory
pub struct ChatlogDb {
    repository: Arc<ChatlogRepository>,
    limits: QueryLimits,
}

impl ChatlogDb {
    /// Open the data directory described by `config`
    pub fn open(config: &AppConfig) -> Result<Self> {
        let platform = config.platform()?;
        let options = OpenOptions {
            copy_before_open: config.storage.copy_before_open,
            work_dir: config.work_dir(),
            close_grace: Duration::from_millis(config.cache.close_grace_ms),
            poll_interval: (config.cache.poll_interval_ms > 0)
                .then(|| Duration::from_millis(config.cache.poll_interval_ms)),
        };
        let limits = QueryLimits::from(config);
        let db = Self::with_options(&config.data_dir(), platform, config.storage.version, options, limits)?;
        if config.storage.watch {
            db.repository.db().start()?;
        }
        Ok(db)
    }

    /// Open `data_dir` for an explicit platform and schema version, without watching
    pub fn with_options(
        data_dir: &Path,
        platform: Platform,
        version: u32,
        options: OpenOptions,
        limits: QueryLimits,
    ) -> Result<Self> {
        InputValidator::validate_data_dir(data_dir)?;
        let variant = StorageVariant::select(platform, version)?;

        let manager = Arc::new(DbManager::new(data_dir, options));
        let source = for_variant(variant, platform, manager.root());
        for spec in source.groups() {
            manager.add_group(spec)?;
        }

        info!(
            data_dir = %manager.root().display(),
            platform = %platform,
            version,
            variant = %variant,
            "Chat data directory opened"
        );
        Ok(Self {
            repository: Arc::new(ChatlogRepository::new(manager, source)),
            limits,
        })
    }

    /// Variant selected for this session
    pub fn variant(&self) -> StorageVariant {
        self.repository.variant()
    }

    /// Underlying query orchestrator
    pub fn repository(&self) -> &Arc<ChatlogRepository> {
        &self.repository
    }

    /// Subscribe to change events of a file group
    pub fn set_callback(&self, group: &str, callback: GroupCallback) -> Result<()> {
        self.repository.db().add_callback(group, callback)
    }

    /// Messages for a query; the limit is bounded by the configured limits
    pub fn get_messages(&self, query: &MessageQuery) -> Result<Vec<Message>> {
        let mut query = query.clone();
        query.limit = self.limits.resolve(query.limit)?;
        self.repository.get_messages(&query)
    }

    /// Contacts matching `key`
    pub fn get_contacts(&self, key: &str, offset: usize, limit: usize) -> Result<Vec<Contact>> {
        self.repository.get_contacts(key, offset, self.limits.resolve(limit)?)
    }

    /// Chat rooms matching `key`
    pub fn get_chat_rooms(&self, key: &str, offset: usize, limit: usize) -> Result<Vec<ChatRoom>> {
        self.repository.get_chat_rooms(key, offset, self.limits.resolve(limit)?)
    }

    /// Sessions matching `key`, newest first
    pub fn get_sessions(&self, key: &str, offset: usize, limit: usize) -> Result<Vec<Session>> {
        self.repository.get_sessions(key, offset, self.limits.resolve(limit)?)
    }

    /// Media blob by kind and key
    pub fn get_media(&self, kind: MediaKind, key: &str) -> Result<Media> {
        self.repository.get_media(kind, key)
    }

    /// Stop watching and release every shard handle
    pub fn close(&self) {
        self.repository.db().close();
        info!("Chat data directory closed");
    }
}

/// Async query surface
#[async_trait]
pub trait ChatlogQuery: Send + Sync {
    /// See [`ChatlogDb::get_messages`]
    async fn messages(&self, query: MessageQuery) -> Result<Vec<Message>>;
    /// See [`ChatlogDb::get_contacts`]
    async fn contacts(&self, key: String, offset: usize, limit: usize) -> Result<Vec<Contact>>;
    /// See [`ChatlogDb::get_chat_rooms`]
    async fn chat_rooms(&self, key: String, offset: usize, limit: usize) -> Result<Vec<ChatRoom>>;
    /// See [`ChatlogDb::get_sessions`]
    async fn sessions(&self, key: String, offset: usize, limit: usize) -> Result<Vec<Session>>;
    /// See [`ChatlogDb::get_media`]
    async fn media(&self, kind: MediaKind, key: String) -> Result<Media>;
}

#[async_trait]
impl ChatlogQuery for Arc<ChatlogDb> {
    async fn messages(&self, query: MessageQuery) -> Result<Vec<Message>> {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || db.get_messages(&query)).await?
    }

    async fn contacts(&self, key: String, offset: usize, limit: usize) -> Result<Vec<Contact>> {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || db.get_contacts(&key, offset, limit)).await?
    }

    async fn chat_rooms(&self, key: String, offset: usize, limit: usize) -> Result<Vec<ChatRoom>> {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || db.get_chat_rooms(&key, offset, limit)).await?
    }

    async fn sessions(&self, key: String, offset: usize, limit: usize) -> Result<Vec<Session>> {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || db.get_sessions(&key, offset, limit)).await?
    }

    async fn media(&self, kind: MediaKind, key: String) -> Result<Media> {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || db.get_media(kind, &key)).await?
    }
}

impl From<&AppConfig> for QueryLimits {
    fn from(config: &AppConfig) -> Self {
        Self {
            default_limit: config.query.default_limit,
            max_limit: config.query.max_limit,
        }
    }
}
