//! Tenant-facing domain entities and their validation rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::Error;

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '/' | '-')
}

fn is_path_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-')
}

pub fn validate_key(key: &str) -> Result<(), Error> {
    if key.is_empty() || !key.chars().all(is_key_char) {
        return Err(Error::InvalidKey);
    }
    Ok(())
}

pub fn validate_category(category: &str) -> Result<(), Error> {
    if category.is_empty() || !category.chars().all(is_key_char) {
        return Err(Error::InvalidCategory);
    }
    Ok(())
}

/// Clamp a caller-supplied page size: zero falls back to 100, anything above
/// 1000 is capped.
#[must_use]
pub fn clamp_page_limit(limit: usize) -> usize {
    if limit == 0 {
        100
    } else {
        limit.min(1000)
    }
}

/// A typed key-value entry. Records are stored on top of these, with the key
/// composed as `tenant/collection/id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub key: String,
    pub category: String,
    pub value: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Item {
    /// Build an entry with fresh timestamps. The repository assigns the
    /// persisted timestamps on upsert.
    #[must_use]
    pub fn new(key: impl Into<String>, category: impl Into<String>, value: Value) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            key: key.into(),
            category: category.into(),
            value,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        validate_key(&self.key)?;
        validate_category(&self.category)
    }
}

/// Key-range scan over the KV table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    pub category: String,
    pub prefix: String,
    pub after_key: String,
    pub limit: usize,
}

impl ScanFilter {
    pub fn validate(&self) -> Result<(), Error> {
        if !self.category.is_empty() {
            validate_category(&self.category)?;
        }
        if !self.prefix.is_empty() {
            validate_key(&self.prefix)?;
        }
        if !self.after_key.is_empty() {
            validate_key(&self.after_key)?;
        }
        Ok(())
    }
}

/// A JSON document scoped to `(tenant_id, collection, id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub tenant_id: String,
    pub collection: String,
    pub id: String,
    pub data: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Record {
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        collection: impl Into<String>,
        id: impl Into<String>,
        data: Value,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            tenant_id: tenant_id.into(),
            collection: collection.into(),
            id: id.into(),
            data,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        validate_key(&self.tenant_id)?;
        validate_category(&self.collection)?;
        validate_key(&self.id)
    }

    /// Composed KV key: `tenant/collection/id`.
    #[must_use]
    pub fn storage_key(tenant_id: &str, collection: &str, id: &str) -> String {
        format!("{tenant_id}/{collection}/{id}")
    }

    /// Key prefix shared by every record in a collection.
    #[must_use]
    pub fn storage_prefix(tenant_id: &str, collection: &str) -> String {
        format!("{tenant_id}/{collection}/")
    }

    /// KV category for a collection: `tenant/collection`.
    #[must_use]
    pub fn storage_category(tenant_id: &str, collection: &str) -> String {
        format!("{tenant_id}/{collection}")
    }
}

/// Split a dot path into segments. Returns `None` when the path is empty or
/// has an empty segment (leading, trailing, or doubled dot).
#[must_use]
pub fn split_json_path(path: &str) -> Option<Vec<&str>> {
    if path.is_empty() {
        return None;
    }
    let mut segments = Vec::new();
    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        segments.push(segment);
    }
    Some(segments)
}

/// Single-path JSON filter applied during record listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonPathFilter {
    pub path: String,
    pub op: String,
    pub value: String,
}

impl JsonPathFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.path.is_empty() && self.op.is_empty() && self.value.is_empty()
    }

    /// Fill in the default operator (`eq`) when only a path was given.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if !self.path.is_empty() && self.op.is_empty() {
            self.op = "eq".to_string();
        }
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.path.is_empty() {
            if self.op.is_empty() && self.value.is_empty() {
                return Ok(());
            }
            return Err(Error::InvalidFilter);
        }

        let segments = split_json_path(&self.path).ok_or(Error::InvalidFilter)?;
        for segment in segments {
            if !segment.chars().all(is_path_segment_char) {
                return Err(Error::InvalidFilter);
            }
        }

        let op = if self.op.is_empty() { "eq" } else { self.op.as_str() };
        match op {
            "eq" | "ne" | "contains" => {
                if self.value.is_empty() {
                    return Err(Error::InvalidFilter);
                }
            }
            "exists" => {
                if !self.value.is_empty() {
                    return Err(Error::InvalidFilter);
                }
            }
            _ => return Err(Error::InvalidFilter),
        }
        Ok(())
    }
}

/// Listing options for records in one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordListFilter {
    pub prefix: String,
    pub after: String,
    pub limit: usize,
    pub json: JsonPathFilter,
}

/// Per-collection JSON Schema document (Draft 7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub tenant_id: String,
    pub collection: String,
    pub schema: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl CollectionSchema {
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        collection: impl Into<String>,
        schema: Value,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            tenant_id: tenant_id.into(),
            collection: collection.into(),
            schema,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An API key row. Only the SHA-256 hash of the raw token is ever stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub token_hash: String,
    pub tenant_id: String,
    pub name: String,
    pub active: bool,
    pub created_at: OffsetDateTime,
}
