//! Queue data model.
//!
//! A queue item is one captured image waiting to be delivered. The queue is
//! an ordered list of items, persisted as a single versioned JSON document.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::record::{self, Document};

// ---------------------------------------------------------------------------
// Item identity
// ---------------------------------------------------------------------------

/// Opaque item identifier.
///
/// New ids are UUID v4 strings. Older records carry millisecond timestamps,
/// sometimes as JSON numbers; both are accepted and kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for compact listings.
    pub fn short(&self) -> String {
        self.0.chars().take(8).collect()
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(u64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => Self(s),
            RawId::Number(n) => Self(n.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Queue item
// ---------------------------------------------------------------------------

/// One pending delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: ItemId,

    /// Local reference to the captured image. Not interpreted by the queue.
    pub uri: String,

    /// Missing on records written before timestamps were tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueued_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// A fresh item with a new id, stamped now.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            id: ItemId::new(),
            uri: uri.into(),
            enqueued_at: Some(Utc::now()),
        }
    }

    /// An item with a caller-chosen id and no timestamp.
    pub fn with_id(id: impl Into<ItemId>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            enqueued_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// FIFO sequence of pending items. Index 0 is the head (oldest).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Queue {
    items: Vec<QueueItem>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a queue from items in FIFO order, dropping later duplicates of an id.
    pub fn from_items(items: impl IntoIterator<Item = QueueItem>) -> Self {
        let mut queue = Self::new();
        for item in items {
            queue.push(item);
        }
        queue
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The oldest still-pending item.
    pub fn head(&self) -> Option<&QueueItem> {
        self.items.first()
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueItem> {
        self.items.iter()
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.iter().any(|item| &item.id == id)
    }

    /// Append at the tail. Returns false (and leaves the queue alone) if the id
    /// is already present.
    pub fn push(&mut self, item: QueueItem) -> bool {
        if self.contains(&item.id) {
            return false;
        }
        self.items.push(item);
        true
    }

    /// Remove an item by identity, preserving the order of the rest.
    pub fn remove(&mut self, id: &ItemId) -> Option<QueueItem> {
        let pos = self.items.iter().position(|item| &item.id == id)?;
        Some(self.items.remove(pos))
    }

    /// Serialize as a versioned document.
    pub fn encode(&self) -> serde_json::Result<String> {
        record::encode(&self.items)
    }

    /// Parse a stored record.
    ///
    /// Accepts the versioned document and the legacy bare array. Anything
    /// else, including items with a blank id or uri and duplicate ids, is
    /// rejected with a description of what was wrong.
    pub fn decode(raw: &str) -> Result<Self, String> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Stored {
            Current(Document<Vec<QueueItem>>),
            Legacy(Vec<QueueItem>),
        }

        let items = match serde_json::from_str::<Stored>(raw) {
            Ok(Stored::Current(doc)) => record::check_version(doc)?,
            Ok(Stored::Legacy(items)) => items,
            Err(e) => return Err(format!("unrecognized queue record: {e}")),
        };

        let mut seen = HashSet::new();
        for item in &items {
            if item.id.as_str().trim().is_empty() {
                return Err("queue item with empty id".to_string());
            }
            if item.uri.trim().is_empty() {
                return Err(format!("queue item {} has an empty uri", item.id));
            }
            if !seen.insert(item.id.clone()) {
                return Err(format!("duplicate queue item id {}", item.id));
            }
        }

        Ok(Self { items })
    }
}

impl<'a> IntoIterator for &'a Queue {
    type Item = &'a QueueItem;
    type IntoIter = std::slice::Iter<'a, QueueItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
