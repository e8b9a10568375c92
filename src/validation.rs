use std::path::Path;

use chrono::{DateTime, Local};

use crate::error::{ChatlogError, Result};
use crate::models::{MediaKind, MessageQuery};

const MAX_TALKERS: usize = 100;
const MAX_ID_LEN: usize = 256;
const MAX_KEYWORD_LEN: usize = 1000;

fn invalid(msg: impl Into<String>) -> ChatlogError {
    ChatlogError::InvalidInput(msg.into())
}

/// Validation utilities for query input
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Validate a single talker or sender id
    pub fn validate_id(id: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(invalid("Id cannot be empty"));
        }

        if id.len() > MAX_ID_LEN {
            return Err(invalid(format!("Id too long (max {MAX_ID_LEN} characters)")));
        }

        if id.chars().any(char::is_control) {
            return Err(invalid("Id contains invalid characters"));
        }

        Ok(())
    }

    /// Split a comma-separated id list, dropping blanks and duplicates
    pub fn split_ids(list: &str) -> Result<Vec<String>> {
        let mut ids: Vec<String> = Vec::new();
        for id in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            Self::validate_id(id)?;
            if !ids.iter().any(|known| known == id) {
                ids.push(id.to_string());
            }
        }

        if ids.len() > MAX_TALKERS {
            return Err(invalid(format!("Too many ids (max {MAX_TALKERS})")));
        }

        Ok(ids)
    }

    /// Validate keyword filter
    pub fn validate_keyword(keyword: &str) -> Result<()> {
        if keyword.len() > MAX_KEYWORD_LEN {
            return Err(invalid(format!("Keyword too long (max {MAX_KEYWORD_LEN} characters)")));
        }

        if keyword.contains('\0') {
            return Err(invalid("Keyword contains invalid characters"));
        }

        Ok(())
    }

    /// Validate a half-open time window
    pub fn validate_time_range(start: Option<DateTime<Local>>, end: Option<DateTime<Local>>) -> Result<()> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(invalid("Start time cannot be after end time"));
            }

            let days = (end - start).num_days();
            if days > 365 * 10 {
                tracing::warn!(days, "Large time range may scan many shards");
            }
        }

        Ok(())
    }

    /// Validate limit against the configured maximum; 0 means unlimited
    pub fn validate_limit(limit: usize, max_limit: usize) -> Result<()> {
        if limit > max_limit {
            return Err(invalid(format!("Limit too large (max {max_limit})")));
        }

        Ok(())
    }

    /// Validate a full message query
    pub fn validate_message_query(query: &MessageQuery) -> Result<()> {
        if query.talker.trim().is_empty() {
            return Err(invalid("Talker cannot be empty"));
        }
        Self::validate_keyword(&query.keyword)?;
        Self::validate_time_range(query.range.start, query.range.end)
    }

    /// Validate a media lookup key: hex content hash, or a numeric server id for voice
    pub fn validate_media_key(kind: MediaKind, key: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(invalid("Media key cannot be empty"));
        }

        let valid = match kind {
            MediaKind::Voice => key.chars().all(|c| c.is_ascii_digit()),
            MediaKind::Image | MediaKind::Video | MediaKind::File => {
                key.len() == 32 && key.chars().all(|c| c.is_ascii_hexdigit())
            }
        };
        if !valid {
            return Err(invalid(format!("Invalid {kind} key: {key}")));
        }

        Ok(())
    }

    /// Validate the data directory
    pub fn validate_data_dir(path: &Path) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Err(invalid("Data directory cannot be empty"));
        }

        if !path.is_dir() {
            return Err(invalid(format!("Data directory does not exist: {}", path.display())));
        }

        Ok(())
    }

    /// Sanitize text input
    #[must_use]
    pub fn sanitize_text(text: &str) -> String {
        text.chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t' || *c == '\r')
            .collect::<String>()
            .trim()
            .to_string()
    }
}
