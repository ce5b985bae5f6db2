// tests/subscriptions.rs

use std::collections::BTreeSet;
use std::path::Path;

use distro_tracker::fs::FileSystem;
use distro_tracker::fs::mock::MockFileSystem;
use distro_tracker::subscriptions::{STANDARD_KEYWORDS, SubscriptionStore};

const STORE: &str = "/var/lib/distro-tracker/subscriptions.json";

fn set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn store() -> SubscriptionStore {
    let mut store = SubscriptionStore::with_standard_keywords();
    store.add_package("dpkg");
    store.add_package("apt");
    store
}

#[test]
fn test_missing_file_loads_standard_keywords() {
    let fs = MockFileSystem::new();

    let store = SubscriptionStore::load(&fs, Path::new(STORE)).unwrap();

    assert_eq!(store.keywords().count(), STANDARD_KEYWORDS.len());
    let defaults = store.default_keywords();
    assert!(defaults.contains("bts"));
    assert!(defaults.contains("summary"));
    assert!(!defaults.contains("cvs"));
    assert!(store.keyword_exists("derivatives-bugs"));
    assert!(!fs.exists(Path::new(STORE)));
}

#[test]
fn test_save_then_load_preserves_everything() {
    let fs = MockFileSystem::new();
    let mut original = store();
    original.create_for("dpkg", "jane@example.net", true);
    original.create_for("apt", "jane@example.net", false);
    original
        .subscription_keywords_mut("dpkg", "jane@example.net")
        .unwrap()
        .add("cvs");
    original.record_bounce("jane@example.net");

    original.save(&fs, Path::new(STORE)).unwrap();
    let loaded = SubscriptionStore::load(&fs, Path::new(STORE)).unwrap();

    assert_eq!(loaded, original);
    assert!(!fs.exists(Path::new("/var/lib/distro-tracker/subscriptions.json.tmp")));
}

#[test]
fn test_corrupt_store_is_an_error() {
    let fs = MockFileSystem::new();
    fs.add_file(STORE, b"{ not json".to_vec());

    let err = SubscriptionStore::load(&fs, Path::new(STORE)).unwrap_err();

    assert!(format!("{err:#}").contains("parsing subscription store"));
}

#[test]
fn test_create_for_requires_known_package() {
    let mut store = store();

    assert!(store.create_for("nope", "jane@example.net", true).is_none());
    assert!(store.user("jane@example.net").is_none());

    let sub = store.create_for("dpkg", "jane@example.net", true).unwrap();
    assert_eq!(sub.package, "dpkg");
    assert!(sub.active);
    assert_eq!(
        store.user("jane@example.net").unwrap().default_keywords,
        store.default_keywords()
    );
}

#[test]
fn test_create_for_updates_the_active_flag() {
    let mut store = store();
    store.create_for("dpkg", "jane@example.net", false);
    assert!(!store.is_user_subscribed_to("jane@example.net", "dpkg"));
    assert!(store.get_for_email("jane@example.net").is_empty());

    store.create_for("dpkg", "jane@example.net", true);

    assert!(store.is_user_subscribed_to("jane@example.net", "dpkg"));
    assert_eq!(store.get_for_email("jane@example.net").len(), 1);
}

#[test]
fn test_unsubscribe_needs_known_package_and_user() {
    let mut store = store();
    store.create_for("dpkg", "jane@example.net", true);

    assert!(!store.unsubscribe("nope", "jane@example.net"));
    assert!(!store.unsubscribe("dpkg", "ghost@example.net"));
    // Known package and user without a subscription between them.
    assert!(store.unsubscribe("apt", "jane@example.net"));

    assert!(store.unsubscribe("dpkg", "jane@example.net"));
    assert!(store.subscription("dpkg", "jane@example.net").is_none());
    assert!(store.user("jane@example.net").is_some());
}

#[test]
fn test_unsubscribe_all_counts_removed_subscriptions() {
    let mut store = store();
    store.create_for("dpkg", "jane@example.net", true);
    store.create_for("apt", "jane@example.net", false);
    store.create_for("apt", "john@example.net", true);

    assert_eq!(store.unsubscribe_all("jane@example.net"), 2);
    assert_eq!(store.unsubscribe_all("jane@example.net"), 0);
    assert!(store.is_user_subscribed_to("john@example.net", "apt"));
}

#[test]
fn test_keyword_queries_only_see_active_subscriptions() {
    let mut store = store();
    store.create_for("dpkg", "jane@example.net", true);
    store.create_for("dpkg", "john@example.net", true);
    store.create_for("dpkg", "idle@example.net", false);
    store
        .subscription_keywords_mut("dpkg", "john@example.net")
        .unwrap()
        .set(["cvs"]);

    assert_eq!(store.subscribers_for("dpkg", "bts"), vec!["jane@example.net"]);
    assert_eq!(store.subscribers_for("dpkg", "cvs"), vec!["john@example.net"]);
    assert!(store.subscribers_for("apt", "bts").is_empty());

    assert_eq!(store.all_active(None).len(), 2);
    let with_cvs: Vec<&str> = store
        .all_active(Some("cvs"))
        .iter()
        .map(|s| s.email.as_str())
        .collect();
    assert_eq!(with_cvs, vec!["john@example.net"]);
}

#[test]
fn test_linked_subscription_follows_user_defaults() {
    let mut store = store();
    store.create_for("dpkg", "jane@example.net", true);
    assert!(
        store
            .subscription("dpkg", "jane@example.net")
            .unwrap()
            .keywords
            .is_linked()
    );

    store
        .user_mut("jane@example.net")
        .unwrap()
        .default_keywords = set(&["ddtp"]);

    assert_eq!(
        store.subscription_keywords("dpkg", "jane@example.net"),
        Some(set(&["ddtp"]))
    );
    assert_eq!(store.subscribers_for("dpkg", "ddtp"), vec!["jane@example.net"]);
    assert!(store.subscribers_for("dpkg", "bts").is_empty());
}

#[test]
fn test_first_edit_detaches_subscription_from_defaults() {
    let mut store = store();
    store.create_for("dpkg", "jane@example.net", true);
    store.create_for("apt", "jane@example.net", true);

    {
        let mut kws = store
            .subscription_keywords_mut("dpkg", "jane@example.net")
            .unwrap();
        assert!(kws.is_linked());
        assert!(kws.remove("bts"));
        assert!(!kws.is_linked());
    }
    store
        .user_mut("jane@example.net")
        .unwrap()
        .default_keywords
        .insert("cvs".to_string());

    let dpkg = store.subscription_keywords("dpkg", "jane@example.net").unwrap();
    assert!(!dpkg.contains("bts"));
    assert!(!dpkg.contains("cvs"));
    assert!(dpkg.contains("summary"));

    let apt = store.subscription_keywords("apt", "jane@example.net").unwrap();
    assert!(apt.contains("bts"));
    assert!(apt.contains("cvs"));
}

#[test]
fn test_bounces_are_counted_per_known_user() {
    let mut store = store();
    store.create_for("dpkg", "jane@example.net", true);

    assert_eq!(store.record_bounce("jane@example.net"), Some(1));
    assert_eq!(store.record_bounce("jane@example.net"), Some(2));
    assert_eq!(store.record_bounce("ghost@example.net"), None);
}

#[test]
fn test_binary_packages_map_to_their_source() {
    let fs = MockFileSystem::new();
    let mut store = store();

    assert!(store.add_binary_package("libapt-pkg6.0", "apt"));
    assert!(!store.add_binary_package("orphan-bin", "nope"));

    assert!(store.binary_exists_with_name("libapt-pkg6.0"));
    assert!(!store.binary_exists_with_name("orphan-bin"));
    assert!(!store.exists_with_name("libapt-pkg6.0"));
    assert_eq!(store.source_for_binary("libapt-pkg6.0"), Some("apt"));
    assert_eq!(store.source_for_binary("apt"), None);

    store.save(&fs, Path::new(STORE)).unwrap();
    let loaded = SubscriptionStore::load(&fs, Path::new(STORE)).unwrap();
    assert_eq!(loaded.source_for_binary("libapt-pkg6.0"), Some("apt"));
}
