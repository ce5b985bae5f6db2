// src/subscriptions/store.rs

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::fs::FileSystem;
use crate::subscriptions::keywords::{KeywordsMut, SubscriptionKeywords};

/// Keywords every fresh store knows about, with their `default` flag.
pub const STANDARD_KEYWORDS: &[(&str, bool)] = &[
    ("default", true),
    ("bts", true),
    ("bts-control", true),
    ("summary", true),
    ("upload-source", true),
    ("archive", true),
    ("contact", true),
    ("build", true),
    ("upload-binary", false),
    ("cvs", false),
    ("ddtp", false),
    ("derivatives", false),
    ("derivatives-bugs", false),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub name: String,
    pub default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailUser {
    pub email: String,
    pub default_keywords: BTreeSet<String>,
    #[serde(default)]
    pub bounces: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub email: String,
    pub package: String,
    pub active: bool,
    pub keywords: SubscriptionKeywords,
}

/// Packages, users, keywords and the subscriptions linking them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStore {
    #[serde(default)]
    keywords: BTreeMap<String, Keyword>,
    #[serde(default)]
    packages: BTreeSet<String>,
    /// Binary package name to the source package building it.
    #[serde(default)]
    binaries: BTreeMap<String, String>,
    #[serde(default)]
    users: BTreeMap<String, EmailUser>,
    #[serde(default)]
    subscriptions: Vec<Subscription>,
}

static NO_KEYWORDS: BTreeSet<String> = BTreeSet::new();

impl SubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with [`STANDARD_KEYWORDS`].
    pub fn with_standard_keywords() -> Self {
        let mut store = Self::new();
        for (name, default) in STANDARD_KEYWORDS {
            store.add_keyword(*name, *default);
        }
        store
    }

    /// Read the store from `path`. A missing file gives a fresh store seeded
    /// with [`STANDARD_KEYWORDS`].
    pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<Self> {
        if !fs.exists(path) {
            debug!(path = ?path, "no subscription store yet");
            return Ok(Self::with_standard_keywords());
        }
        let raw = fs.read(path)?;
        let store: Self = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing subscription store {:?}", path))?;
        info!(
            path = ?path,
            users = store.users.len(),
            subscriptions = store.subscriptions.len(),
            "loaded subscription store"
        );
        Ok(store)
    }

    /// Write the store as pretty JSON, replacing `path` atomically.
    pub fn save(&self, fs: &dyn FileSystem, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("serializing subscription store")?;
        let tmp = path.with_extension("json.tmp");
        fs.write(&tmp, &json)?;
        fs.rename(&tmp, path)?;
        debug!(path = ?path, "saved subscription store");
        Ok(())
    }

    // Keywords

    pub fn add_keyword(&mut self, name: impl Into<String>, default: bool) {
        let name = name.into();
        self.keywords.insert(
            name.clone(),
            Keyword {
                name,
                default,
            },
        );
    }

    pub fn keyword_exists(&self, name: &str) -> bool {
        self.keywords.contains_key(name)
    }

    pub fn keywords(&self) -> impl Iterator<Item = &Keyword> {
        self.keywords.values()
    }

    /// Names of the keywords flagged `default`.
    pub fn default_keywords(&self) -> BTreeSet<String> {
        self.keywords
            .values()
            .filter(|k| k.default)
            .map(|k| k.name.clone())
            .collect()
    }

    // Packages

    pub fn add_package(&mut self, name: impl Into<String>) -> bool {
        self.packages.insert(name.into())
    }

    pub fn exists_with_name(&self, package: &str) -> bool {
        self.packages.contains(package)
    }

    /// Record that `source` builds `binary`. `false` if `source` is not a
    /// known package. A binary may share its name with a source package.
    pub fn add_binary_package(&mut self, binary: impl Into<String>, source: &str) -> bool {
        if !self.exists_with_name(source) {
            return false;
        }
        self.binaries.insert(binary.into(), source.to_string());
        true
    }

    pub fn binary_exists_with_name(&self, binary: &str) -> bool {
        self.binaries.contains_key(binary)
    }

    /// The source package building `binary`.
    pub fn source_for_binary(&self, binary: &str) -> Option<&str> {
        self.binaries.get(binary).map(String::as_str)
    }

    // Users

    /// Existing user, or a new one holding every default keyword.
    pub fn get_or_create_user(&mut self, email: &str) -> &mut EmailUser {
        let defaults = self.default_keywords();
        self.users
            .entry(email.to_string())
            .or_insert_with(|| EmailUser {
                email: email.to_string(),
                default_keywords: defaults,
                bounces: 0,
            })
    }

    pub fn user(&self, email: &str) -> Option<&EmailUser> {
        self.users.get(email)
    }

    pub fn user_mut(&mut self, email: &str) -> Option<&mut EmailUser> {
        self.users.get_mut(email)
    }

    /// Count a bounce for `email`; returns the new total.
    pub fn record_bounce(&mut self, email: &str) -> Option<u32> {
        let user = self.users.get_mut(email)?;
        user.bounces += 1;
        Some(user.bounces)
    }

    // Subscriptions

    /// Subscribe `email` to `package`, or update the `active` flag of an
    /// existing subscription. `None` if the package is unknown.
    pub fn create_for(&mut self, package: &str, email: &str, active: bool) -> Option<&Subscription> {
        if !self.exists_with_name(package) {
            return None;
        }
        self.get_or_create_user(email);

        let pos = match self.position(package, email) {
            Some(pos) => pos,
            None => {
                self.subscriptions.push(Subscription {
                    email: email.to_string(),
                    package: package.to_string(),
                    active,
                    keywords: SubscriptionKeywords::linked_to(email),
                });
                self.subscriptions.len() - 1
            }
        };
        let sub = &mut self.subscriptions[pos];
        sub.active = active;
        Some(sub)
    }

    /// Drop the subscription of `email` to `package`.
    ///
    /// Returns `false` only when the package or the user is unknown; a
    /// missing subscription between known ones still counts as done.
    pub fn unsubscribe(&mut self, package: &str, email: &str) -> bool {
        if !self.exists_with_name(package) || !self.users.contains_key(email) {
            return false;
        }
        if let Some(pos) = self.position(package, email) {
            self.subscriptions.remove(pos);
        }
        true
    }

    /// Remove every subscription of `email`; returns how many were dropped.
    pub fn unsubscribe_all(&mut self, email: &str) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.email != email);
        before - self.subscriptions.len()
    }

    pub fn subscription(&self, package: &str, email: &str) -> Option<&Subscription> {
        self.position(package, email).map(|pos| &self.subscriptions[pos])
    }

    /// Active subscriptions of `email`.
    pub fn get_for_email(&self, email: &str) -> Vec<&Subscription> {
        self.subscriptions
            .iter()
            .filter(|s| s.active && s.email == email)
            .collect()
    }

    /// Active subscriptions, optionally only those including `keyword`.
    pub fn all_active(&self, keyword: Option<&str>) -> Vec<&Subscription> {
        self.subscriptions
            .iter()
            .filter(|s| s.active)
            .filter(|s| keyword.is_none_or(|kw| self.has_keyword(s, kw)))
            .collect()
    }

    pub fn is_user_subscribed_to(&self, email: &str, package: &str) -> bool {
        self.subscription(package, email).is_some_and(|s| s.active)
    }

    /// Emails of active subscribers of `package` whose keywords include
    /// `keyword`.
    pub fn subscribers_for(&self, package: &str, keyword: &str) -> Vec<&str> {
        self.subscriptions
            .iter()
            .filter(|s| s.active && s.package == package && self.has_keyword(s, keyword))
            .map(|s| s.email.as_str())
            .collect()
    }

    /// Effective keywords of one subscription.
    pub fn subscription_keywords(&self, package: &str, email: &str) -> Option<BTreeSet<String>> {
        let sub = self.subscription(package, email)?;
        Some(sub.keywords.resolve(self.owner_defaults(sub)).clone())
    }

    pub fn subscription_keywords_mut(
        &mut self,
        package: &str,
        email: &str,
    ) -> Option<KeywordsMut<'_>> {
        let pos = self.position(package, email)?;
        let sub = &mut self.subscriptions[pos];
        let defaults = match &sub.keywords {
            SubscriptionKeywords::Linked(owner) => {
                self.users.get(owner).map_or(&NO_KEYWORDS, |u| &u.default_keywords)
            }
            SubscriptionKeywords::Owned(_) => &NO_KEYWORDS,
        };
        Some(KeywordsMut::new(&mut sub.keywords, defaults))
    }

    fn has_keyword(&self, sub: &Subscription, keyword: &str) -> bool {
        sub.keywords.contains(keyword, self.owner_defaults(sub))
    }

    fn owner_defaults(&self, sub: &Subscription) -> &BTreeSet<String> {
        match &sub.keywords {
            SubscriptionKeywords::Linked(owner) => self
                .users
                .get(owner)
                .map_or(&NO_KEYWORDS, |u| &u.default_keywords),
            SubscriptionKeywords::Owned(_) => &NO_KEYWORDS,
        }
    }

    fn position(&self, package: &str, email: &str) -> Option<usize> {
        self.subscriptions
            .iter()
            .position(|s| s.package == package && s.email == email)
    }
}
