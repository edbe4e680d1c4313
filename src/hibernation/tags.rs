use std::collections::HashMap;
use std::sync::Arc;

use crate::core::{Arena, ArenaKey, HibernationError, SocketId};

/// Handle to a tag bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BucketId(ArenaKey);

/// One socket's entry in one bucket. Held by the socket so removal never searches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagMembership {
    bucket: BucketId,
    entry: ArenaKey,
}

impl TagMembership {
    #[cfg(test)]
    pub(crate) fn bucket(&self) -> BucketId {
        self.bucket
    }
}

#[derive(Debug)]
struct TagBucket {
    tag: Arc<str>,
    members: Arena<SocketId>,
}

/// Tag -> sockets index.
///
/// A bucket exists exactly while it has at least one member.
#[derive(Debug)]
pub struct TagIndex {
    buckets: Arena<TagBucket>,
    by_tag: HashMap<Arc<str>, BucketId>,
    max_tags: usize,
}

impl TagIndex {
    pub fn new(max_tags: usize) -> Self {
        Self {
            buckets: Arena::new(),
            by_tag: HashMap::new(),
            max_tags,
        }
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn lookup(&self, tag: &str) -> Option<BucketId> {
        self.by_tag.get(tag).copied()
    }

    /// How many of `tags` have no bucket yet.
    pub fn missing_tags<'a>(&self, tags: impl IntoIterator<Item = &'a str>) -> usize {
        tags.into_iter()
            .filter(|tag| !self.by_tag.contains_key(*tag))
            .count()
    }

    /// Existing bucket for `tag`, or a fresh empty one.
    ///
    /// A fresh bucket must receive a member before control returns to a caller that could
    /// observe the index, otherwise the "no empty buckets" rule is broken.
    pub fn upsert_bucket(&mut self, tag: &str) -> Result<BucketId, HibernationError> {
        if let Some(id) = self.lookup(tag) {
            return Ok(id);
        }
        if self.buckets.len() >= self.max_tags {
            return Err(HibernationError::TooManyTags {
                limit: self.max_tags,
            });
        }
        let tag: Arc<str> = Arc::from(tag);
        let id = BucketId(self.buckets.insert(TagBucket {
            tag: Arc::clone(&tag),
            members: Arena::new(),
        }));
        self.by_tag.insert(tag, id);
        Ok(id)
    }

    /// Shared tag string of a bucket.
    #[cfg(test)]
    pub(crate) fn tag(&self, bucket: BucketId) -> Option<&Arc<str>> {
        self.buckets.get(bucket.0).map(|b| &b.tag)
    }

    /// Upsert the bucket for `tag` and add `socket` to it.
    ///
    /// Returns the membership together with the bucket's shared tag string.
    pub fn join(
        &mut self,
        tag: &str,
        socket: SocketId,
    ) -> Result<(TagMembership, Arc<str>), HibernationError> {
        let bucket = self.upsert_bucket(tag)?;
        let entry = self
            .buckets
            .get_mut(bucket.0)
            .expect("tag index lost a bucket it just upserted");
        let member = entry.members.insert(socket);
        Ok((
            TagMembership {
                bucket,
                entry: member,
            },
            Arc::clone(&entry.tag),
        ))
    }

    pub fn add_member(&mut self, bucket: BucketId, socket: SocketId) -> Option<TagMembership> {
        let entry = self.buckets.get_mut(bucket.0)?.members.insert(socket);
        Some(TagMembership { bucket, entry })
    }

    /// Unlink one membership; deletes the bucket if it was the last member.
    pub fn remove_member(&mut self, membership: TagMembership) {
        let Some(bucket) = self.buckets.get_mut(membership.bucket.0) else {
            return;
        };
        bucket.members.remove(membership.entry);
        if bucket.members.is_empty() {
            if let Some(bucket) = self.buckets.remove(membership.bucket.0) {
                self.by_tag.remove(&bucket.tag);
            }
        }
    }

    pub fn members(&self, bucket: BucketId) -> impl Iterator<Item = SocketId> + '_ {
        self.buckets
            .get(bucket.0)
            .into_iter()
            .flat_map(|b| b.members.iter().map(|(_, socket)| *socket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socket(n: u32) -> SocketId {
        let mut arena = Arena::new();
        let mut key = arena.insert(());
        for _ in 0..n {
            key = arena.insert(());
        }
        SocketId(key)
    }

    #[test]
    fn members_share_a_bucket_and_last_removal_deletes_it() {
        let mut index = TagIndex::new(8);
        let a = socket(0);
        let b = socket(1);

        let bucket = index.upsert_bucket("room").unwrap();
        let ma = index.add_member(bucket, a).unwrap();
        let again = index.upsert_bucket("room").unwrap();
        assert_eq!(bucket, again);
        let mb = index.add_member(again, b).unwrap();

        let mut members: Vec<_> = index.members(bucket).collect();
        members.sort_by_key(|s| s.0.index());
        assert_eq!(members, vec![a, b]);
        assert_eq!(index.len(), 1);

        index.remove_member(ma);
        assert_eq!(index.members(bucket).collect::<Vec<_>>(), vec![b]);
        index.remove_member(mb);
        assert!(index.is_empty());
        assert!(index.lookup("room").is_none());
        assert_eq!(index.members(bucket).count(), 0);
    }

    #[test]
    fn tag_strings_are_shared_with_the_bucket() {
        let mut index = TagIndex::new(8);
        let bucket = index.upsert_bucket("shared").unwrap();
        let tag = Arc::clone(index.tag(bucket).unwrap());
        assert_eq!(&*tag, "shared");
        assert!(Arc::ptr_eq(&tag, index.tag(bucket).unwrap()));
    }

    #[test]
    fn bucket_cap_rejects_only_new_tags() {
        let mut index = TagIndex::new(1);
        let bucket = index.upsert_bucket("one").unwrap();
        index.add_member(bucket, socket(0)).unwrap();

        assert!(matches!(
            index.upsert_bucket("two"),
            Err(HibernationError::TooManyTags { limit: 1 })
        ));
        assert_eq!(index.upsert_bucket("one").unwrap(), bucket);
        assert_eq!(index.missing_tags(["one", "two", "three"]), 2);
    }

    #[test]
    fn join_returns_the_bucket_owned_tag() {
        let mut index = TagIndex::new(8);
        let (first, tag_a) = index.join("lobby", socket(0)).unwrap();
        let (second, tag_b) = index.join("lobby", socket(1)).unwrap();
        assert_eq!(first.bucket(), second.bucket());
        assert!(Arc::ptr_eq(&tag_a, &tag_b));
        assert_eq!(index.members(first.bucket()).count(), 2);
    }

    #[test]
    fn stale_membership_is_ignored() {
        let mut index = TagIndex::new(8);
        let bucket = index.upsert_bucket("x").unwrap();
        let m = index.add_member(bucket, socket(0)).unwrap();
        index.remove_member(m);
        index.remove_member(m);
        assert!(index.is_empty());
    }
}
