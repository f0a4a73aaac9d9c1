//! Inline comments: the local cache and the write port it relays through.
//!
//! Comments are owned by server-side storage. A local create/resolve goes
//! through [`CommentApi`] first and is only folded into the cache and
//! broadcast once the write succeeded. Inbound `comment:add` /
//! `comment:update` events are merged by id, last arrival wins.
//!
//! Offsets are taken at creation time and are not re-anchored as the
//! document changes.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::protocol::CursorRange;

/// A comment as stored by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub doc_id: Uuid,
    pub author_name: String,
    pub from_pos: u32,
    pub to_pos: u32,
    pub text: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    /// Anchored range at creation time.
    pub fn range(&self) -> CursorRange {
        CursorRange::new(self.from_pos, self.to_pos)
    }
}

/// Body of a create request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub author_name: String,
    pub from_pos: u32,
    pub to_pos: u32,
    pub text: String,
}

impl NewComment {
    pub fn new(
        author_name: impl Into<String>,
        range: CursorRange,
        text: impl Into<String>,
    ) -> Self {
        Self {
            author_name: author_name.into(),
            from_pos: range.from.min(range.to),
            to_pos: range.from.max(range.to),
            text: text.into(),
        }
    }
}

/// Body of a patch request; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CommentPatch {
    pub fn resolve() -> Self {
        Self {
            resolved: Some(true),
            text: None,
        }
    }
}

/// Authoritative comment writes (request/response).
pub trait CommentApi: Send + Sync {
    fn list_comments(&self, doc_id: Uuid) -> BoxFuture<'_, Result<Vec<Comment>, ApiError>>;

    fn add_comment(&self, doc_id: Uuid, comment: NewComment)
        -> BoxFuture<'_, Result<Comment, ApiError>>;

    fn update_comment(
        &self,
        doc_id: Uuid,
        comment_id: String,
        patch: CommentPatch,
    ) -> BoxFuture<'_, Result<Comment, ApiError>>;
}

/// Client-side cache of a document's comments.
#[derive(Debug, Clone, Default)]
pub struct CommentCache {
    comments: Vec<Comment>,
}

impl CommentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole cache with a fresh listing.
    pub fn replace_all(&mut self, comments: Vec<Comment>) {
        self.comments = comments;
    }

    /// Append a comment unless its id is already known.
    ///
    /// Returns `true` if the cache changed.
    pub fn merge_added(&mut self, comment: Comment) -> bool {
        if self.comments.iter().any(|c| c.id == comment.id) {
            return false;
        }
        self.comments.push(comment);
        true
    }

    /// Replace the entry with the same id, appending if unseen.
    ///
    /// Returns `true` if the cache changed.
    pub fn merge_updated(&mut self, comment: Comment) -> bool {
        match self.comments.iter_mut().find(|c| c.id == comment.id) {
            Some(existing) if *existing == comment => false,
            Some(existing) => {
                *existing = comment;
                true
            }
            None => {
                self.comments.push(comment);
                true
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Comment> {
        self.comments.iter()
    }

    /// Comments still open.
    pub fn unresolved(&self) -> impl Iterator<Item = &Comment> {
        self.comments.iter().filter(|c| !c.resolved)
    }

    pub fn len(&self) -> usize {
        self.comments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    /// Owned copy, for handing to the caller.
    pub fn to_vec(&self) -> Vec<Comment> {
        self.comments.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: &str, text: &str) -> Comment {
        Comment {
            id: id.into(),
            doc_id: Uuid::nil(),
            author_name: "Alice".into(),
            from_pos: 0,
            to_pos: 5,
            text: text.into(),
            resolved: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_duplicate_add_kept_once() {
        let mut cache = CommentCache::new();
        assert!(cache.merge_added(comment("c1", "first")));
        assert!(!cache.merge_added(comment("c1", "first")));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.iter().filter(|c| c.id == "c1").count(), 1);
    }

    #[test]
    fn test_add_does_not_overwrite() {
        let mut cache = CommentCache::new();
        cache.merge_added(comment("c1", "original"));
        cache.merge_added(comment("c1", "imposter"));
        assert_eq!(cache.get("c1").unwrap().text, "original");
    }

    #[test]
    fn test_update_replaces_in_place() {
        let mut cache = CommentCache::new();
        cache.merge_added(comment("c1", "a"));
        cache.merge_added(comment("c2", "b"));

        let mut resolved = comment("c1", "a");
        resolved.resolved = true;
        assert!(cache.merge_updated(resolved));

        let ids: Vec<_> = cache.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert!(cache.get("c1").unwrap().resolved);
        assert_eq!(cache.unresolved().count(), 1);
    }

    #[test]
    fn test_update_unseen_appends() {
        let mut cache = CommentCache::new();
        assert!(cache.merge_updated(comment("c9", "late")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_identical_update_is_noop() {
        let mut cache = CommentCache::new();
        let c = comment("c1", "same");
        cache.merge_added(c.clone());
        assert!(!cache.merge_updated(c));
    }

    #[test]
    fn test_last_update_wins() {
        let mut cache = CommentCache::new();
        cache.merge_updated(comment("c1", "one"));
        cache.merge_updated(comment("c1", "two"));
        assert_eq!(cache.get("c1").unwrap().text, "two");
    }

    #[test]
    fn test_replace_all() {
        let mut cache = CommentCache::new();
        cache.merge_added(comment("old", "x"));
        cache.replace_all(vec![comment("a", "1"), comment("b", "2")]);
        assert!(cache.get("old").is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_new_comment_orders_range() {
        let body = NewComment::new("Alice", CursorRange::new(9, 2), "hi");
        assert_eq!((body.from_pos, body.to_pos), (2, 9));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["authorName"], "Alice");
        assert_eq!(json["toPos"], 9);
    }

    #[test]
    fn test_patch_skips_absent_fields() {
        let json = serde_json::to_string(&CommentPatch::resolve()).unwrap();
        assert_eq!(json, r#"{"resolved":true}"#);
    }
}
