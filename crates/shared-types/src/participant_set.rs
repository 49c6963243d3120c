//! # Participant Sets
//!
//! Membership sets of peer addresses. A commit uses one for the fixed
//! participant universe and one for the growing tally of affirmative votes.
//!
//! - [`ParticipantSet`] is a plain owned set. Mutation needs `&mut`, so it
//!   cannot be changed from two tasks at once without an outer lock.
//! - [`SyncParticipantSet`] carries its own `RwLock` and can be shared
//!   (e.g. behind an `Arc`) by concurrent callers.

use crate::entities::Address;
use parking_lot::RwLock;
use std::collections::hash_set;
use std::collections::HashSet;

/// Set of participant addresses.
///
/// Equality is membership equality; insertion order is irrelevant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantSet {
    members: HashSet<Address>,
}

impl ParticipantSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set from a list of addresses. Duplicates collapse.
    pub fn with_members<I, A>(members: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Address>,
    {
        members.into_iter().map(Into::into).collect()
    }

    /// Membership test.
    #[must_use]
    pub fn has(&self, address: &str) -> bool {
        self.members.contains(address)
    }

    /// Insert an address. Returns `true` if it was not already present.
    pub fn add(&mut self, address: impl Into<Address>) -> bool {
        self.members.insert(address.into())
    }

    /// Remove an address. Returns `true` if it was present.
    pub fn remove(&mut self, address: &str) -> bool {
        self.members.remove(address)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Remove every member.
    pub fn clear(&mut self) {
        self.members.clear();
    }

    /// Iterate members in unspecified order.
    pub fn iter(&self) -> hash_set::Iter<'_, Address> {
        self.members.iter()
    }

    /// Call `f` once per member.
    pub fn for_each(&self, f: impl FnMut(&Address)) {
        self.members.iter().for_each(f);
    }

    /// Members as a sorted list.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Address> {
        let mut list: Vec<Address> = self.members.iter().cloned().collect();
        list.sort();
        list
    }

    /// Members of `self` that are absent from `other`.
    #[must_use]
    pub fn diff(&self, other: &ParticipantSet) -> ParticipantSet {
        self.members
            .difference(&other.members)
            .cloned()
            .collect()
    }

    /// True when every member of `self` is also in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &ParticipantSet) -> bool {
        self.members.is_subset(&other.members)
    }
}

impl<A: Into<Address>> FromIterator<A> for ParticipantSet {
    fn from_iter<I: IntoIterator<Item = A>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<A: Into<Address>> Extend<A> for ParticipantSet {
    fn extend<I: IntoIterator<Item = A>>(&mut self, iter: I) {
        self.members.extend(iter.into_iter().map(Into::into));
    }
}

impl IntoIterator for ParticipantSet {
    type Item = Address;
    type IntoIter = hash_set::IntoIter<Address>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.into_iter()
    }
}

impl<'a> IntoIterator for &'a ParticipantSet {
    type Item = &'a Address;
    type IntoIter = hash_set::Iter<'a, Address>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.iter()
    }
}

/// Internally synchronized participant set.
///
/// Reads take the shared lock, mutations the exclusive lock. Snapshots are
/// independent copies; changing one never affects the shared set.
#[derive(Debug, Default)]
pub struct SyncParticipantSet {
    inner: RwLock<ParticipantSet>,
}

impl SyncParticipantSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set from a list of addresses.
    pub fn with_members<I, A>(members: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Address>,
    {
        Self {
            inner: RwLock::new(ParticipantSet::with_members(members)),
        }
    }

    pub fn has(&self, address: &str) -> bool {
        self.inner.read().has(address)
    }

    pub fn add(&self, address: impl Into<Address>) -> bool {
        self.inner.write().add(address)
    }

    pub fn remove(&self, address: &str) -> bool {
        self.inner.write().remove(address)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Call `f` once per member while holding the shared lock.
    ///
    /// `f` must not call back into this set's mutating methods.
    pub fn for_each(&self, f: impl FnMut(&Address)) {
        self.inner.read().for_each(f);
    }

    pub fn to_vec(&self) -> Vec<Address> {
        self.inner.read().to_vec()
    }

    /// Independent copy of the current membership.
    pub fn snapshot(&self) -> ParticipantSet {
        self.inner.read().clone()
    }

    /// Members of `self` that are absent from `other`.
    pub fn diff(&self, other: &ParticipantSet) -> ParticipantSet {
        self.inner.read().diff(other)
    }
}

impl Clone for SyncParticipantSet {
    fn clone(&self) -> Self {
        Self {
            inner: RwLock::new(self.snapshot()),
        }
    }
}

impl PartialEq for SyncParticipantSet {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let theirs = other.snapshot();
        *self.inner.read() == theirs
    }
}

impl From<ParticipantSet> for SyncParticipantSet {
    fn from(set: ParticipantSet) -> Self {
        Self {
            inner: RwLock::new(set),
        }
    }
}
