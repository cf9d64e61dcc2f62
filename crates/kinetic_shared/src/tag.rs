//! # Hierarchical Tags
//!
//! Dot-separated classification names such as `Visual.Character.Default`.
//! A tag matches a query when the query is the tag itself or one of its
//! ancestors: `Visual.Character.Default` matches `Visual.Character`, but
//! `Visual.CharacterX` does not.
//!
//! Each tag carries a stable 32-bit hash computed once at construction.
//! The hash feeds the store checksum, so it must never depend on process
//! state (no random keys).

use std::hash::Hasher;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

/// A hierarchical tag.
///
/// Cloning is cheap (shared name).
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Tag {
    name: Arc<str>,
    hash: u32,
}

impl Tag {
    /// Creates a tag from its dotted name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            hash: stable_hash(name),
            name: Arc::from(name),
        }
    }

    /// The dotted name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable hash used by checksums.
    #[inline]
    #[must_use]
    pub const fn stable_hash(&self) -> u32 {
        self.hash
    }

    /// False for the empty tag.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
    }

    /// True if `query` is this tag or one of its ancestors.
    #[must_use]
    pub fn matches(&self, query: &Tag) -> bool {
        let name = self.name.as_bytes();
        let prefix = query.name.as_bytes();
        if !query.is_valid() || name.len() < prefix.len() || !name.starts_with(prefix) {
            return false;
        }
        name.len() == prefix.len() || name[prefix.len()] == b'.'
    }

    /// The direct parent (`A.B.C` -> `A.B`), if any.
    #[must_use]
    pub fn parent(&self) -> Option<Tag> {
        self.name.rfind('.').map(|dot| Tag::new(&self.name[..dot]))
    }
}

fn stable_hash(name: &str) -> u32 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write(name.as_bytes());
    let h = hasher.finish();
    #[allow(clippy::cast_possible_truncation)]
    let folded = (h ^ (h >> 32)) as u32;
    folded
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.name == other.name
    }
}

impl Eq for Tag {}

/// The empty (invalid) tag.
impl Default for Tag {
    fn default() -> Self {
        Self::new("")
    }
}

impl std::hash::Hash for Tag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for Tag {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tag {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

impl std::fmt::Debug for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tag({})", self.name)
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for Tag {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Tag {
    fn from(name: String) -> Self {
        Self::new(&name)
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.name.to_string()
    }
}

/// Insertion-ordered, duplicate-free set of tags.
///
/// Order is part of the checksum, so it is preserved exactly as tags were
/// added.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagContainer {
    tags: Vec<Tag>,
}

impl TagContainer {
    /// Creates an empty container.
    #[must_use]
    pub const fn new() -> Self {
        Self { tags: Vec::new() }
    }

    /// Number of tags.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// True when no tags are present.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Iterates in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.tags.iter()
    }

    /// Adds `tag` unless an identical tag is already present.
    ///
    /// Returns `true` if the tag was added.
    pub fn add(&mut self, tag: Tag) -> bool {
        if !tag.is_valid() || self.has_tag_exact(&tag) {
            return false;
        }
        self.tags.push(tag);
        true
    }

    /// Removes the exact tag. Returns `true` if it was present.
    pub fn remove(&mut self, tag: &Tag) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| t != tag);
        before != self.tags.len()
    }

    /// Removes every tag.
    pub fn clear(&mut self) {
        self.tags.clear();
    }

    /// True if any tag is `query` or a descendant of it.
    #[must_use]
    pub fn has_tag(&self, query: &Tag) -> bool {
        self.tags.iter().any(|t| t.matches(query))
    }

    /// True only for an identical tag.
    #[must_use]
    pub fn has_tag_exact(&self, query: &Tag) -> bool {
        self.tags.iter().any(|t| t == query)
    }

    /// True if any query tag is matched (ancestor rules).
    #[must_use]
    pub fn has_any(&self, queries: &TagContainer) -> bool {
        queries.iter().any(|q| self.has_tag(q))
    }

    /// True if every query tag is matched (ancestor rules). Empty queries match.
    #[must_use]
    pub fn has_all(&self, queries: &TagContainer) -> bool {
        queries.iter().all(|q| self.has_tag(q))
    }

    /// First tag (in insertion order) that lives under `parent`.
    #[must_use]
    pub fn first_with_parent(&self, parent: &Tag) -> Option<&Tag> {
        self.tags.iter().find(|t| t.matches(parent))
    }

    /// All tags that live under `parent`.
    #[must_use]
    pub fn filter_with_parent(&self, parent: &Tag) -> TagContainer {
        self.tags.iter().filter(|t| t.matches(parent)).cloned().collect()
    }
}

impl FromIterator<Tag> for TagContainer {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        let mut container = Self::new();
        for tag in iter {
            container.add(tag);
        }
        container
    }
}

impl<'a> IntoIterator for &'a TagContainer {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.tags.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ancestor_matching() {
        let tag = Tag::new("Visual.Character.Default");
        assert!(tag.matches(&Tag::new("Visual.Character")));
        assert!(tag.matches(&Tag::new("Visual")));
        assert!(tag.matches(&Tag::new("Visual.Character.Default")));
        assert!(!tag.matches(&Tag::new("Visual.Char")));
        assert!(!tag.matches(&Tag::new("Visual.Character.Default.Extra")));
        assert!(!tag.matches(&Tag::new("")));
    }

    #[test]
    fn test_stable_hash_is_content_based() {
        assert_eq!(Tag::new("A.B").stable_hash(), Tag::new("A.B").stable_hash());
        assert_ne!(Tag::new("A.B").stable_hash(), Tag::new("A.C").stable_hash());
    }

    #[test]
    fn test_container_exact_vs_ancestor() {
        let mut tags = TagContainer::new();
        assert!(tags.add(Tag::new("Status.Burning")));
        assert!(!tags.add(Tag::new("Status.Burning")));
        assert_eq!(tags.len(), 1);

        assert!(tags.has_tag(&Tag::new("Status")));
        assert!(!tags.has_tag_exact(&Tag::new("Status")));
        assert!(tags.has_tag_exact(&Tag::new("Status.Burning")));

        assert!(tags.remove(&Tag::new("Status.Burning")));
        assert!(tags.is_empty());
    }

    #[test]
    fn test_parent_queries() {
        let tags: TagContainer = ["Visual.Knight", "Status.Stunned", "Status.Burning"]
            .into_iter()
            .map(Tag::new)
            .collect();
        let status = Tag::new("Status");
        assert_eq!(tags.first_with_parent(&status).map(Tag::name), Some("Status.Stunned"));
        assert_eq!(tags.filter_with_parent(&status).len(), 2);

        let any: TagContainer = [Tag::new("Visual"), Tag::new("Missing")].into_iter().collect();
        assert!(tags.has_any(&any));
        assert!(!tags.has_all(&any));
        assert_eq!(Tag::new("A.B.C").parent(), Some(Tag::new("A.B")));
    }
}
