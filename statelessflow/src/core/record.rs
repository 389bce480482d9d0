//! Flow records: the unit of data moved between stages.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Well-known attribute names.
pub mod attributes {
    /// Textual form of the record id.
    pub const UUID: &str = "uuid";
    /// Name of the file the content came from or should be written to.
    pub const FILENAME: &str = "filename";
    /// Relative directory path associated with the content.
    pub const PATH: &str = "path";
    /// Shared identifier of all fragments split from one record.
    pub const FRAGMENT_IDENTIFIER: &str = "fragment.identifier";
    /// One-based position of a fragment within its parent.
    pub const FRAGMENT_INDEX: &str = "fragment.index";
    /// Total number of fragments split from the parent.
    pub const FRAGMENT_COUNT: &str = "fragment.count";
}

/// A unit of data with string attributes and an opaque byte payload.
///
/// Content is never edited in place: stages install a new payload with
/// [`FlowRecord::replace_content`] or derive a child with [`FlowRecord::fork`].
/// Records are not `Clone`: at any instant a record lives in exactly
/// one queue or one stage invocation.
#[derive(PartialEq, Eq)]
pub struct FlowRecord {
    id: Uuid,
    parent: Option<Uuid>,
    created_at: DateTime<Utc>,
    lineage_start: DateTime<Utc>,
    attributes: HashMap<String, String>,
    content: Bytes,
}

impl FlowRecord {
    /// Creates a new root record.
    #[must_use]
    pub fn new(content: impl Into<Bytes>) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut attrs = HashMap::new();
        attrs.insert(attributes::UUID.to_string(), id.to_string());

        Self {
            id,
            parent: None,
            created_at: now,
            lineage_start: now,
            attributes: attrs,
            content: content.into(),
        }
    }

    /// Creates a record carrying the given text.
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(text.into())
    }

    /// Sets an attribute, builder style.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.put_attribute(key, value);
        self
    }

    /// Derives a child record with a copy of this record's attributes and new content.
    ///
    /// The child gets a fresh id and remembers this record as its parent.
    #[must_use]
    pub fn fork(&self, content: impl Into<Bytes>) -> Self {
        let id = Uuid::new_v4();
        let mut attrs = self.attributes.clone();
        attrs.insert(attributes::UUID.to_string(), id.to_string());

        Self {
            id,
            parent: Some(self.id),
            created_at: Utc::now(),
            lineage_start: self.lineage_start,
            attributes: attrs,
            content: content.into(),
        }
    }

    /// Returns the record id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the id of the record this one was forked from.
    #[must_use]
    pub fn parent(&self) -> Option<Uuid> {
        self.parent
    }

    /// Returns when this record was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the oldest ancestor of this record was created.
    #[must_use]
    pub fn lineage_start(&self) -> DateTime<Utc> {
        self.lineage_start
    }

    /// Returns an attribute value.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Returns all attributes.
    #[must_use]
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// Sets an attribute, returning the previous value.
    pub fn put_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.attributes.insert(key.into(), value.into())
    }

    /// Removes an attribute. The `uuid` attribute cannot be removed.
    pub fn remove_attribute(&mut self, key: &str) -> Option<String> {
        if key == attributes::UUID {
            return None;
        }
        self.attributes.remove(key)
    }

    /// Returns the content handle.
    #[must_use]
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Returns the content as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn content_text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    /// Installs a new content handle, returning the old one.
    pub fn replace_content(&mut self, content: impl Into<Bytes>) -> Bytes {
        std::mem::replace(&mut self.content, content.into())
    }

    /// Returns the content size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

impl fmt::Debug for FlowRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowRecord")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("attributes", &self.attributes.len())
            .field("size", &self.content.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_has_uuid_attribute() {
        let record = FlowRecord::from_text("hello");
        assert_eq!(record.attribute(attributes::UUID), Some(record.id().to_string().as_str()));
        assert_eq!(record.size(), 5);
        assert!(record.parent().is_none());
    }

    #[test]
    fn test_fork_copies_attributes() {
        let parent = FlowRecord::from_text("a\nb").with_attribute(attributes::FILENAME, "in.txt");
        let child = parent.fork("a");

        assert_ne!(child.id(), parent.id());
        assert_eq!(child.parent(), Some(parent.id()));
        assert_eq!(child.attribute(attributes::FILENAME), Some("in.txt"));
        assert_eq!(child.attribute(attributes::UUID), Some(child.id().to_string().as_str()));
        assert_eq!(child.lineage_start(), parent.lineage_start());
        assert_eq!(child.content_text(), "a");
    }

    #[test]
    fn test_fork_attributes_are_independent() {
        let parent = FlowRecord::from_text("x").with_attribute("k", "1");
        let mut child = parent.fork("y");
        child.put_attribute("k", "2");

        assert_eq!(parent.attribute("k"), Some("1"));
        assert_eq!(child.attribute("k"), Some("2"));
    }

    #[test]
    fn test_replace_content() {
        let mut record = FlowRecord::from_text("old");
        let previous = record.replace_content("new content");

        assert_eq!(&previous[..], b"old");
        assert_eq!(record.content_text(), "new content");
        assert_eq!(record.size(), 11);
    }

    #[test]
    fn test_uuid_attribute_is_pinned() {
        let mut record = FlowRecord::from_text("x").with_attribute("tmp", "1");
        assert_eq!(record.remove_attribute(attributes::UUID), None);
        assert_eq!(record.remove_attribute("tmp"), Some("1".to_string()));
        assert!(record.attribute(attributes::UUID).is_some());
    }
}
