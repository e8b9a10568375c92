//! Query orchestration across shards.
//!
//! Every entity query resolves its file group, runs the variant's per-shard
//! fetch on every shard, merges the results and only then filters, orders and
//! paginates. Pagination is never pushed down into a shard.

use std::collections::HashSet;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::datasource::DataSource;
use crate::db::DbManager;
use crate::error::{ChatlogError, Result};
use crate::logging::OperationTimer;
use crate::metrics::MetricsCollector;
use crate::models::{ChatRoom, Contact, Media, MediaKind, Message, MessageQuery, Session, StorageVariant};
use crate::schema::groups;
use crate::validation::InputValidator;

/// Apply offset and limit to an already ordered sequence; `limit == 0` keeps the rest
#[must_use]
pub fn paginate<T>(items: Vec<T>, offset: usize, limit: usize) -> Vec<T> {
    let take = if limit == 0 { usize::MAX } else { limit };
    items.into_iter().skip(offset).take(take).collect()
}

/// Keyword filter: a case-insensitive regex, or a literal substring when the
/// keyword is not a valid pattern
#[derive(Debug, Clone)]
pub struct KeywordFilter(Option<Regex>);

impl KeywordFilter {
    /// Build the filter; an empty keyword matches everything
    pub fn new(keyword: &str) -> Result<Self> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(Self(None));
        }
        let regex = match RegexBuilder::new(keyword).case_insensitive(true).build() {
            Ok(re) => re,
            Err(_) => RegexBuilder::new(&regex::escape(keyword))
                .case_insensitive(true)
                .build()?,
        };
        Ok(Self(Some(regex)))
    }

    /// Whether `text` passes the filter
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        self.0.as_ref().map_or(true, |re| re.is_match(text))
    }
}

/// Orchestrates entity queries over one session's storage
pub struct ChatlogRepository {
    db: Arc<DbManager>,
    source: Box<dyn DataSource>,
    metrics: MetricsCollector,
}

impl ChatlogRepository {
    /// Repository over `db` using `source` for the session's variant
    pub fn new(db: Arc<DbManager>, source: Box<dyn DataSource>) -> Self {
        Self {
            db,
            source,
            metrics: MetricsCollector::default(),
        }
    }

    /// Variant served by this repository
    pub fn variant(&self) -> StorageVariant {
        self.source.variant()
    }

    /// Connection cache
    pub fn db(&self) -> &Arc<DbManager> {
        &self.db
    }

    /// Run `fetch` on every shard of `group` and concatenate the results.
    ///
    /// A shard whose query fails is logged and skipped; if none succeeds the
    /// call fails with `NoShardsAvailable`. Each shard handle is held for the
    /// duration of its query, so an invalidation cannot close it underneath.
    fn fan_out<T>(&self, group: &str, fetch: impl Fn(&Connection) -> Result<Vec<T>>) -> Result<Vec<T>> {
        let shards = self.db.get_connections(group)?;
        let mut merged = Vec::new();
        let mut succeeded = 0usize;

        for shard in &shards {
            match shard.get().and_then(|conn| fetch(&conn)) {
                Ok(rows) => {
                    succeeded += 1;
                    merged.extend(rows);
                }
                Err(e) => {
                    warn!(group, path = %shard.path().display(), error = %e, "Shard query failed, skipping");
                    self.metrics.record_error("shard_query", group);
                }
            }
        }

        if succeeded == 0 {
            return Err(ChatlogError::NoShardsAvailable(group.to_string()));
        }
        debug!(group, shard_count = shards.len(), succeeded, rows = merged.len(), "Fan-out complete");
        Ok(merged)
    }

    /// Messages matching `query`, globally ordered by `(time, seq)` and then paginated
    pub fn get_messages(&self, query: &MessageQuery) -> Result<Vec<Message>> {
        let timer = OperationTimer::new("get_messages");
        let result = self.get_messages_inner(query);
        self.finish("messages", timer, &result);
        result.map(|(messages, _)| messages)
    }

    fn get_messages_inner(&self, query: &MessageQuery) -> Result<(Vec<Message>, usize)> {
        InputValidator::validate_message_query(query)?;
        let talkers = InputValidator::split_ids(&query.talker)?;
        if talkers.is_empty() {
            return Err(ChatlogError::InvalidInput("Talker cannot be empty".to_string()));
        }
        let senders: HashSet<String> = InputValidator::split_ids(&query.sender)?.into_iter().collect();
        let keyword = KeywordFilter::new(&InputValidator::sanitize_text(&query.keyword))?;

        let mut merged = Vec::new();
        for talker in &talkers {
            let rows = self.fan_out(groups::MESSAGE, |conn| self.source.messages(conn, talker, &query.range))?;
            self.metrics.record_decoded(self.source.variant().as_str(), rows.len());
            merged.extend(rows);
        }
        let scanned = merged.len();

        let mut messages: Vec<Message> = merged
            .into_iter()
            .filter(|m| query.range.contains(m.time.timestamp()))
            .filter(|m| talkers.iter().any(|t| *t == m.talker))
            .filter(|m| senders.is_empty() || senders.contains(&m.sender))
            .filter(|m| keyword.matches(&m.content))
            .collect();
        messages.sort_by_key(Message::sort_key);

        info!(
            talkers = talkers.len(),
            scanned,
            matched = messages.len(),
            offset = query.offset,
            limit = query.limit,
            "Messages merged"
        );
        Ok((paginate(messages, query.offset, query.limit), scanned))
    }

    /// Contacts matching `key` (exact match preferred over substring), deduplicated
    pub fn get_contacts(&self, key: &str, offset: usize, limit: usize) -> Result<Vec<Contact>> {
        let timer = OperationTimer::new("get_contacts");
        let result = self.get_contacts_inner(key).map(|all| {
            let scanned = all.len();
            (paginate(all, offset, limit), scanned)
        });
        self.finish("contacts", timer, &result);
        result.map(|(contacts, _)| contacts)
    }

    fn all_contacts(&self) -> Result<Vec<Contact>> {
        let rows = self.fan_out(self.source.contact_group(), |conn| self.source.contacts(conn))?;
        let mut seen = HashSet::new();
        Ok(rows
            .into_iter()
            .filter(|c| !c.user_name.is_empty() && seen.insert(c.user_name.clone()))
            .collect())
    }

    fn get_contacts_inner(&self, key: &str) -> Result<Vec<Contact>> {
        let key = key.trim();
        let contacts = self.all_contacts()?;
        if key.is_empty() {
            return Ok(contacts);
        }
        let exact: Vec<Contact> = contacts.iter().filter(|c| c.matches_exact(key)).cloned().collect();
        if !exact.is_empty() {
            return Ok(exact);
        }
        Ok(contacts.into_iter().filter(|c| c.matches_fuzzy(key)).collect())
    }

    /// Chat rooms matching `key` (exact match preferred over substring)
    pub fn get_chat_rooms(&self, key: &str, offset: usize, limit: usize) -> Result<Vec<ChatRoom>> {
        let timer = OperationTimer::new("get_chat_rooms");
        let result = self.get_chat_rooms_inner(key.trim()).map(|all| {
            let scanned = all.len();
            (paginate(all, offset, limit), scanned)
        });
        self.finish("chat_rooms", timer, &result);
        result.map(|(rooms, _)| rooms)
    }

    fn get_chat_rooms_inner(&self, key: &str) -> Result<Vec<ChatRoom>> {
        let rows = self.fan_out(self.source.chat_room_group(), |conn| self.source.chat_rooms(conn))?;
        let mut seen = HashSet::new();
        let rooms: Vec<ChatRoom> = rows
            .into_iter()
            .filter(|r| !r.name.is_empty() && seen.insert(r.name.clone()))
            .collect();
        if key.is_empty() {
            return Ok(rooms);
        }
        let exact: Vec<ChatRoom> = rooms.iter().filter(|r| r.matches(key, true)).cloned().collect();
        if !exact.is_empty() {
            return Ok(exact);
        }
        Ok(rooms.into_iter().filter(|r| r.matches(key, false)).collect())
    }

    /// Sessions, newest first; `key` matches the talker id or display name
    pub fn get_sessions(&self, key: &str, offset: usize, limit: usize) -> Result<Vec<Session>> {
        let timer = OperationTimer::new("get_sessions");
        let result = self.get_sessions_inner(key.trim()).map(|all| {
            let scanned = all.len();
            (paginate(all, offset, limit), scanned)
        });
        self.finish("sessions", timer, &result);
        result.map(|(sessions, _)| sessions)
    }

    fn get_sessions_inner(&self, key: &str) -> Result<Vec<Session>> {
        let mut sessions = self.fan_out(self.source.session_group(), |conn| self.source.sessions(conn))?;

        if sessions.iter().any(|s| s.nick_name.is_empty()) {
            match self.all_contacts() {
                Ok(contacts) => {
                    for session in sessions.iter_mut().filter(|s| s.nick_name.is_empty()) {
                        if let Some(contact) = contacts.iter().find(|c| c.user_name == session.user_name) {
                            session.nick_name = contact.display_name().to_string();
                        }
                    }
                }
                Err(e) => debug!(error = %e, "Contacts unavailable for session names"),
            }
        }

        sessions.sort_by(|a, b| b.n_time.cmp(&a.n_time).then(b.n_order.cmp(&a.n_order)));
        let mut seen = HashSet::new();
        sessions.retain(|s| !s.user_name.is_empty() && seen.insert(s.user_name.clone()));

        if !key.is_empty() {
            sessions.retain(|s| s.user_name == key || s.nick_name.contains(key));
        }
        Ok(sessions)
    }

    /// Media blob for a content key; `NotFound` when no shard has it
    pub fn get_media(&self, kind: MediaKind, key: &str) -> Result<Media> {
        let timer = OperationTimer::new("get_media");
        let result = self.get_media_inner(kind, key.trim()).map(|m| (m, 1));
        self.finish("media", timer, &result);
        result.map(|(media, _)| media)
    }

    fn get_media_inner(&self, kind: MediaKind, key: &str) -> Result<Media> {
        InputValidator::validate_media_key(kind, key)?;
        let Some(group) = self.source.media_group(kind) else {
            return Err(ChatlogError::not_found(kind.as_str(), key));
        };

        let shards = self.db.get_connections(group)?;
        let mut failures = 0usize;
        for shard in &shards {
            match shard.get().and_then(|conn| self.source.media(&conn, kind, key)) {
                Ok(Some(media)) => {
                    debug!(kind = %kind, key, path = %media.path, size = media.size, "Media resolved");
                    return Ok(media);
                }
                Ok(None) => {}
                Err(e) => {
                    failures += 1;
                    warn!(group, path = %shard.path().display(), error = %e, "Media lookup failed, skipping");
                }
            }
        }

        if failures == shards.len() {
            return Err(ChatlogError::NoShardsAvailable(group.to_string()));
        }
        Err(ChatlogError::not_found(kind.as_str(), key))
    }

    fn finish<T>(&self, entity: &'static str, timer: OperationTimer, result: &Result<(T, usize)>) {
        let elapsed = timer.elapsed();
        match result {
            Ok((_, scanned)) => self.metrics.record_query(entity, elapsed, *scanned, true),
            Err(e) => {
                debug!(entity, error = %e, "Query failed");
                self.metrics.record_query(entity, elapsed, 0, false);
            }
        }
        timer.finish();
    }
}
