//! Per-subscription keyword sets.
//!
//! A new subscription follows its owner's default keywords. The first
//! mutation copies the owner's current defaults into a set of its own, and
//! from then on the two evolve independently.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKeywords {
    /// Reads go to the default keywords of the named user.
    Linked(String),
    Owned(BTreeSet<String>),
}

impl SubscriptionKeywords {
    pub fn linked_to(owner: impl Into<String>) -> Self {
        Self::Linked(owner.into())
    }

    pub fn is_linked(&self) -> bool {
        matches!(self, Self::Linked(_))
    }

    /// The effective keyword set, given the owner's current defaults.
    pub fn resolve<'a>(&'a self, owner_defaults: &'a BTreeSet<String>) -> &'a BTreeSet<String> {
        match self {
            Self::Linked(_) => owner_defaults,
            Self::Owned(set) => set,
        }
    }

    pub fn contains(&self, keyword: &str, owner_defaults: &BTreeSet<String>) -> bool {
        self.resolve(owner_defaults).contains(keyword)
    }

    /// Switch to an owned copy of the owner's defaults if still linked.
    pub fn materialize(&mut self, owner_defaults: &BTreeSet<String>) -> &mut BTreeSet<String> {
        if let Self::Linked(_) = self {
            *self = Self::Owned(owner_defaults.clone());
        }
        match self {
            Self::Owned(set) => set,
            Self::Linked(_) => unreachable!("keywords were just materialized"),
        }
    }
}

/// Mutable view on one subscription's keywords.
///
/// Every mutating method materializes the set first.
#[derive(Debug)]
pub struct KeywordsMut<'a> {
    keywords: &'a mut SubscriptionKeywords,
    owner_defaults: &'a BTreeSet<String>,
}

impl<'a> KeywordsMut<'a> {
    pub(crate) fn new(
        keywords: &'a mut SubscriptionKeywords,
        owner_defaults: &'a BTreeSet<String>,
    ) -> Self {
        Self {
            keywords,
            owner_defaults,
        }
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.keywords.contains(keyword, self.owner_defaults)
    }

    pub fn all(&self) -> BTreeSet<String> {
        self.keywords.resolve(self.owner_defaults).clone()
    }

    pub fn is_linked(&self) -> bool {
        self.keywords.is_linked()
    }

    pub fn add(&mut self, keyword: impl Into<String>) -> bool {
        self.keywords
            .materialize(self.owner_defaults)
            .insert(keyword.into())
    }

    pub fn remove(&mut self, keyword: &str) -> bool {
        self.keywords.materialize(self.owner_defaults).remove(keyword)
    }

    pub fn clear(&mut self) {
        self.keywords.materialize(self.owner_defaults).clear();
    }

    pub fn set<I, S>(&mut self, keywords: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = self.keywords.materialize(self.owner_defaults);
        set.clear();
        set.extend(keywords.into_iter().map(Into::into));
    }
}
