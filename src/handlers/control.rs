// src/handlers/control.rs

//! Subscription commands sent to `control@<fqdn>`.
//!
//! Each non-empty body line is one command. Lines starting with `#` are
//! comments. Processing stops at `thanks`, `quit` or a signature separator.
//! The sender gets one reply quoting every command with its result.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use anyhow::Result;
use tracing::{debug, info};

use crate::errors::MailProcessorError;
use crate::handlers::{LOOP_HEADER, TrackerHandler};
use crate::mail::message::{Message, parse_address};
use crate::subscriptions::SubscriptionStore;

const STOP_WORDS: [&str; 4] = ["thanks", "thank", "quit", "--"];

/// Bail out after this many unrecognized lines in a row.
const MAX_UNKNOWN_COMMANDS: usize = 5;

#[derive(Debug, Default)]
struct CommandOutcome {
    reply: String,
    changed: bool,
}

impl CommandOutcome {
    fn text(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            changed: false,
        }
    }

    fn change(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            changed: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeywordOp {
    Add,
    Remove,
    Set,
}

impl KeywordOp {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "+" => Some(Self::Add),
            "-" => Some(Self::Remove),
            "=" => Some(Self::Set),
            _ => None,
        }
    }
}

pub(crate) fn handle(handler: &TrackerHandler, msg: &Message) -> Result<()> {
    if handler.is_looping(msg, "control") {
        info!("dropping message that already went through control");
        return Ok(());
    }

    let from = msg
        .get("From")
        .and_then(parse_address)
        .ok_or_else(|| MailProcessorError::Failed("control message has no From address".to_string()))?;

    let body = msg.body_text();
    let mut reply = String::new();
    let mut changed = false;
    let mut unknown_in_a_row = 0;

    {
        let mut store = handler.lock_store();
        for line in body.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('>') {
                continue;
            }

            let _ = writeln!(reply, "> {line}");
            let first = line.split_whitespace().next().unwrap_or("").to_lowercase();
            if STOP_WORDS.contains(&first.as_str()) {
                reply.push_str("Stopping processing here.\n");
                break;
            }

            let outcome = execute(&mut store, &from, line);
            if outcome.reply.starts_with("Unknown command") {
                unknown_in_a_row += 1;
            } else {
                unknown_in_a_row = 0;
            }
            changed |= outcome.changed;
            reply.push_str(&outcome.reply);
            reply.push_str("\n\n");

            if unknown_in_a_row >= MAX_UNKNOWN_COMMANDS {
                reply.push_str("Too many unknown commands, stopping processing here.\n");
                break;
            }
        }

        if changed {
            handler.persist(&store)?;
        }
    }

    if reply.is_empty() {
        reply.push_str("No commands found in your message.\n");
    }

    let mut answer = Message::new();
    answer.add_header("From", handler.service_address("control"));
    answer.add_header("To", from.as_str());
    answer.add_header(
        "Subject",
        format!("Re: {}", msg.get("Subject").unwrap_or("Your mail")),
    );
    if let Some(id) = msg.get("Message-ID") {
        answer.add_header("In-Reply-To", id);
        answer.add_header("References", id);
    }
    answer.add_header(LOOP_HEADER, handler.service_address("control"));
    answer.set_body(reply);
    handler.outbox().send(&answer)?;

    info!(from = %from, changed, "processed control message");
    Ok(())
}

fn execute(store: &mut SubscriptionStore, from: &str, line: &str) -> CommandOutcome {
    let mut tokens = line.split_whitespace();
    let command = tokens.next().unwrap_or("").to_lowercase();
    let args: Vec<&str> = tokens.collect();
    debug!(command = %command, args = ?args, "control command");

    match command.as_str() {
        "subscribe" => subscribe(store, from, &args),
        "unsubscribe" => unsubscribe(store, from, &args),
        "unsubscribeall" => unsubscribe_all(store, from, &args),
        "which" => which(store, from, &args),
        "keyword" | "keywords" | "tag" | "tags" => keyword(store, from, &args),
        other => CommandOutcome::text(format!("Unknown command: {other}")),
    }
}

/// Resolve the optional email argument, defaulting to the sender.
fn email_arg(arg: Option<&&str>, from: &str) -> Result<String, CommandOutcome> {
    match arg {
        None => Ok(from.to_string()),
        Some(raw) => parse_address(raw)
            .ok_or_else(|| CommandOutcome::text(format!("{raw} is not a valid email address."))),
    }
}

fn subscribe(store: &mut SubscriptionStore, from: &str, args: &[&str]) -> CommandOutcome {
    let Some(package) = args.first() else {
        return CommandOutcome::text("Usage: subscribe <package> [<email>]");
    };
    let email = match email_arg(args.get(1), from) {
        Ok(email) => email,
        Err(outcome) => return outcome,
    };

    let mut notes = String::new();
    let package = if store.exists_with_name(package) {
        package.to_string()
    } else if let Some(source) = store.source_for_binary(package) {
        notes = format!(
            "Warning: {package} is not a source package.\n\
             {package} is the binary package of {source}; subscribing to {source} instead.\n"
        );
        source.to_string()
    } else {
        return CommandOutcome::text(format!("Package {package} does not exist."));
    };

    if store.is_user_subscribed_to(&email, &package) {
        return CommandOutcome::text(format!(
            "{notes}{email} is already subscribed to {package}."
        ));
    }
    store.create_for(&package, &email, true);
    CommandOutcome::change(format!("{notes}{email} has been subscribed to {package}."))
}

fn unsubscribe(store: &mut SubscriptionStore, from: &str, args: &[&str]) -> CommandOutcome {
    let Some(package) = args.first() else {
        return CommandOutcome::text("Usage: unsubscribe <package> [<email>]");
    };
    let email = match email_arg(args.get(1), from) {
        Ok(email) => email,
        Err(outcome) => return outcome,
    };

    if !store.is_user_subscribed_to(&email, package) {
        return CommandOutcome::text(format!(
            "{email} is not subscribed to {package}, you can't unsubscribe."
        ));
    }
    store.unsubscribe(package, &email);
    CommandOutcome::change(format!("{email} has been unsubscribed from {package}."))
}

fn unsubscribe_all(store: &mut SubscriptionStore, from: &str, args: &[&str]) -> CommandOutcome {
    let email = match email_arg(args.first(), from) {
        Ok(email) => email,
        Err(outcome) => return outcome,
    };

    let packages: Vec<String> = store
        .get_for_email(&email)
        .iter()
        .map(|s| s.package.clone())
        .collect();
    if store.unsubscribe_all(&email) == 0 {
        return CommandOutcome::text(format!("{email} is not subscribed to any package."));
    }

    let mut reply = format!("All subscriptions of {email} have been terminated:");
    for package in &packages {
        let _ = write!(reply, "\n* {package}");
    }
    CommandOutcome::change(reply)
}

fn which(store: &SubscriptionStore, from: &str, args: &[&str]) -> CommandOutcome {
    let email = match email_arg(args.first(), from) {
        Ok(email) => email,
        Err(outcome) => return outcome,
    };

    let subs = store.get_for_email(&email);
    if subs.is_empty() {
        return CommandOutcome::text(format!("{email} is not subscribed to any package."));
    }
    let mut reply = format!("Subscriptions of {email}:");
    for sub in subs {
        let _ = write!(reply, "\n* {}", sub.package);
    }
    CommandOutcome::text(reply)
}

/// `keyword [<package>] [<email>] [{+|-|=} <keyword>...]`
///
/// Without a package the user's default keywords are shown or edited.
fn keyword(store: &mut SubscriptionStore, from: &str, args: &[&str]) -> CommandOutcome {
    let op_at = args.iter().position(|t| KeywordOp::parse(t).is_some());
    let (target, op, names) = match op_at {
        Some(i) => (&args[..i], KeywordOp::parse(args[i]), &args[i + 1..]),
        None => (args, None, &args[args.len()..]),
    };

    let (package, email_token) = match target {
        [] => (None, None),
        [one] if one.contains('@') => (None, Some(one)),
        [package] => (Some(*package), None),
        [package, email, ..] => (Some(*package), Some(email)),
    };
    let email = match email_arg(email_token, from) {
        Ok(email) => email,
        Err(outcome) => return outcome,
    };

    let requested: BTreeSet<String> = names
        .iter()
        .flat_map(|n| n.split(','))
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect();
    if let Some(bad) = requested.iter().find(|k| !store.keyword_exists(k)) {
        return CommandOutcome::text(format!("{bad} is not a valid keyword."));
    }
    if op.is_some() && requested.is_empty() && op != Some(KeywordOp::Set) {
        return CommandOutcome::text("No keywords given.");
    }

    match package {
        Some(package) => subscription_keywords(store, package, &email, op, requested),
        None => default_keywords(store, &email, op, requested),
    }
}

fn subscription_keywords(
    store: &mut SubscriptionStore,
    package: &str,
    email: &str,
    op: Option<KeywordOp>,
    requested: BTreeSet<String>,
) -> CommandOutcome {
    let Some(mut keywords) = store.subscription_keywords_mut(package, email) else {
        return CommandOutcome::text(format!("{email} is not subscribed to {package}."));
    };

    let changed = match op {
        None => false,
        Some(KeywordOp::Add) => {
            requested.into_iter().for_each(|k| {
                keywords.add(k);
            });
            true
        }
        Some(KeywordOp::Remove) => {
            requested.iter().for_each(|k| {
                keywords.remove(k);
            });
            true
        }
        Some(KeywordOp::Set) => {
            keywords.set(requested);
            true
        }
    };

    let reply = list_reply(
        &format!("Keywords of {email} for {package}:"),
        &keywords.all(),
    );
    if changed {
        CommandOutcome::change(reply)
    } else {
        CommandOutcome::text(reply)
    }
}

fn default_keywords(
    store: &mut SubscriptionStore,
    email: &str,
    op: Option<KeywordOp>,
    requested: BTreeSet<String>,
) -> CommandOutcome {
    let Some(user) = store.user_mut(email) else {
        return CommandOutcome::text(format!("{email} is not subscribed to any package."));
    };

    let changed = match op {
        None => false,
        Some(KeywordOp::Add) => {
            user.default_keywords.extend(requested);
            true
        }
        Some(KeywordOp::Remove) => {
            user.default_keywords.retain(|k| !requested.contains(k));
            true
        }
        Some(KeywordOp::Set) => {
            user.default_keywords = requested;
            true
        }
    };

    let reply = list_reply(
        &format!("Default keywords of {email}:"),
        &user.default_keywords,
    );
    if changed {
        CommandOutcome::change(reply)
    } else {
        CommandOutcome::text(reply)
    }
}

fn list_reply(title: &str, keywords: &BTreeSet<String>) -> String {
    let mut reply = title.to_string();
    for keyword in keywords {
        let _ = write!(reply, "\n* {keyword}");
    }
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SubscriptionStore {
        let mut store = SubscriptionStore::with_standard_keywords();
        store.add_package("dpkg");
        store
    }

    #[test]
    fn subscribe_then_which() {
        let mut store = store();

        let out = execute(&mut store, "jane@example.org", "subscribe dpkg");
        assert!(out.changed);
        assert!(store.is_user_subscribed_to("jane@example.org", "dpkg"));

        let out = execute(&mut store, "jane@example.org", "which");
        assert!(!out.changed);
        assert!(out.reply.contains("* dpkg"));
    }

    #[test]
    fn subscribe_unknown_package_changes_nothing() {
        let mut store = store();
        let out = execute(&mut store, "jane@example.org", "subscribe nope");
        assert!(!out.changed);
        assert!(out.reply.contains("does not exist"));
    }

    #[test]
    fn subscribe_to_binary_uses_its_source() {
        let mut store = store();
        assert!(store.add_binary_package("dpkg-dev", "dpkg"));

        let out = execute(&mut store, "jane@example.org", "subscribe dpkg-dev");

        assert!(out.changed);
        assert!(out.reply.contains("dpkg-dev is not a source package"));
        assert!(out.reply.contains("jane@example.org has been subscribed to dpkg."));
        assert!(store.is_user_subscribed_to("jane@example.org", "dpkg"));
        assert!(store.subscription("dpkg-dev", "jane@example.org").is_none());

        let out = execute(&mut store, "jane@example.org", "subscribe dpkg-dev");
        assert!(!out.changed);
        assert!(out.reply.contains("already subscribed to dpkg"));
    }

    #[test]
    fn source_wins_over_binary_of_the_same_name() {
        let mut store = store();
        store.add_package("gcc");
        store.add_binary_package("dpkg", "gcc");

        let out = execute(&mut store, "jane@example.org", "subscribe dpkg");

        assert!(!out.reply.contains("Warning"));
        assert!(store.is_user_subscribed_to("jane@example.org", "dpkg"));
        assert!(!store.is_user_subscribed_to("jane@example.org", "gcc"));
    }

    #[test]
    fn keyword_edit_on_subscription() {
        let mut store = store();
        execute(&mut store, "jane@example.org", "subscribe dpkg");

        let out = execute(&mut store, "jane@example.org", "keyword dpkg + cvs");
        assert!(out.changed);

        let kws = store.subscription_keywords("dpkg", "jane@example.org").unwrap();
        assert!(kws.contains("cvs"));
        assert!(kws.contains("bts"));
        assert!(!store.user("jane@example.org").unwrap().default_keywords.contains("cvs"));
    }

    #[test]
    fn keyword_rejects_unknown_names() {
        let mut store = store();
        execute(&mut store, "jane@example.org", "subscribe dpkg");

        let out = execute(&mut store, "jane@example.org", "keyword dpkg + bogus");
        assert!(!out.changed);
        assert!(out.reply.contains("bogus is not a valid keyword"));
    }

    #[test]
    fn default_keywords_can_be_replaced() {
        let mut store = store();
        execute(&mut store, "jane@example.org", "subscribe dpkg");

        execute(&mut store, "jane@example.org", "keyword = bts, summary");

        let user = store.user("jane@example.org").unwrap();
        assert_eq!(
            user.default_keywords.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["bts", "summary"]
        );
    }

    #[test]
    fn invalid_email_argument_is_reported() {
        let mut store = store();
        let out = execute(&mut store, "jane@example.org", "subscribe dpkg not-an-email");
        assert!(out.reply.contains("not a valid email"));
        assert!(!out.changed);
    }
}
