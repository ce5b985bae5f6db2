//! Classify an incoming message by its delivery address and hand it to the
//! matching handler.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::config::TrackerSettings;
use crate::errors::MailProcessorError;
use crate::mail::message::{Message, parse_address};

/// Header fields holding the envelope recipient, in lookup order.
pub const DELIVERY_HEADERS: [&str; 4] =
    ["Delivered-To", "Envelope-To", "X-Original-To", "X-Envelope-To"];

/// Receiver of classified messages.
///
/// Returning a [`MailProcessorError`] (possibly wrapped in `anyhow`) marks
/// the message as permanently failed; any other error is retried.
pub trait MailHandler: Send + Sync {
    fn handle_control(&self, msg: &Message) -> Result<()>;

    fn handle_dispatch(
        &self,
        msg: &Message,
        package: Option<&str>,
        keyword: Option<&str>,
    ) -> Result<()>;

    fn handle_bounces(&self, msg: &Message, details: Option<&str>) -> Result<()>;
}

#[derive(Clone)]
pub struct MailProcessor {
    fqdn: String,
    accept_unqualified_emails: bool,
    handler: Arc<dyn MailHandler>,
}

impl std::fmt::Debug for MailProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailProcessor")
            .field("fqdn", &self.fqdn)
            .field("accept_unqualified_emails", &self.accept_unqualified_emails)
            .finish_non_exhaustive()
    }
}

impl MailProcessor {
    pub fn new(
        fqdn: impl Into<String>,
        accept_unqualified_emails: bool,
        handler: Arc<dyn MailHandler>,
    ) -> Self {
        Self {
            fqdn: fqdn.into(),
            accept_unqualified_emails,
            handler,
        }
    }

    pub fn from_settings(settings: &TrackerSettings, handler: Arc<dyn MailHandler>) -> Self {
        Self::new(
            settings.fqdn.clone(),
            settings.accept_unqualified_emails,
            handler,
        )
    }

    /// The single address in our domain this message was delivered to.
    ///
    /// Every copy of every [`DELIVERY_HEADERS`] field is considered, and
    /// addresses differing only in ASCII case count as one. Returns
    /// `Ok(None)` when none is in our domain and fails when several
    /// different ones are.
    pub fn find_delivery_address(
        &self,
        msg: &Message,
    ) -> std::result::Result<Option<String>, MailProcessorError> {
        let mut found: Vec<String> = Vec::new();
        for addr in delivery_addresses(msg) {
            let known = found.iter().any(|f| same_address(f, &addr));
            if domain_matches(&addr, &self.fqdn) && !known {
                found.push(addr);
            }
        }

        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            _ => Err(MailProcessorError::ConflictingDeliveryAddresses(found)),
        }
    }

    /// Classify `msg` and run the matching handler.
    pub fn process(&self, msg: &Message) -> Result<()> {
        let (service, details) = match self.find_delivery_address(msg)? {
            Some(addr) => identify_service(&addr),
            None if self.accept_unqualified_emails => {
                let Some(addr) = delivery_addresses(msg).into_iter().next() else {
                    return Err(MailProcessorError::MissingDeliveryAddress.into());
                };
                (local_part(&addr).to_string(), None)
            }
            None => return Err(MailProcessorError::MissingDeliveryAddress.into()),
        };

        debug!(service = %service, details = ?details, "classified message");

        match service.as_str() {
            "control" => self.handler.handle_control(msg),
            "dispatch" => {
                let (package, keyword) = split_package_keyword(details.as_deref());
                self.handler.handle_dispatch(msg, package, keyword)
            }
            "bounces" => self.handler.handle_bounces(msg, details.as_deref()),
            _ if self.accept_unqualified_emails => {
                let (package, keyword) = split_package_keyword(Some(&service));
                self.handler.handle_dispatch(msg, package, keyword)
            }
            _ => Err(MailProcessorError::InvalidDeliveryAddress(match details {
                Some(d) => format!("{service}+{d}@{}", self.fqdn),
                None => format!("{service}@{}", self.fqdn),
            })
            .into()),
        }
    }
}

/// Split the local part of `addr` on the first `+`.
///
/// `foo+baz+baz@bar` gives `("foo", Some("baz+baz"))`. The service name is
/// lowercased; details are returned as written.
pub fn identify_service(addr: &str) -> (String, Option<String>) {
    match local_part(addr).split_once('+') {
        Some((service, details)) => (service.to_ascii_lowercase(), Some(details.to_string())),
        None => (local_part(addr).to_ascii_lowercase(), None),
    }
}

/// Split dispatch details `<package>[_<keyword>]` on the first `_`.
pub fn split_package_keyword(details: Option<&str>) -> (Option<&str>, Option<&str>) {
    let Some(details) = details.filter(|d| !d.is_empty()) else {
        return (None, None);
    };
    match details.split_once('_') {
        Some((package, keyword)) => (
            Some(package).filter(|p| !p.is_empty()),
            Some(keyword).filter(|k| !k.is_empty()),
        ),
        None => (Some(details), None),
    }
}

fn delivery_addresses(msg: &Message) -> Vec<String> {
    DELIVERY_HEADERS
        .iter()
        .flat_map(|field| msg.get_all(field))
        .filter_map(parse_address)
        .collect()
}

fn local_part(addr: &str) -> &str {
    addr.rsplit_once('@').map_or(addr, |(local, _)| local)
}

fn same_address(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn domain_matches(addr: &str, fqdn: &str) -> bool {
    addr.rsplit_once('@')
        .is_some_and(|(_, domain)| domain.eq_ignore_ascii_case(fqdn))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_service_splits_on_first_plus() {
        assert_eq!(identify_service("foo@bar"), ("foo".to_string(), None));
        assert_eq!(
            identify_service("foo+baz@bar"),
            ("foo".to_string(), Some("baz".to_string()))
        );
        assert_eq!(
            identify_service("foo+baz+baz@bar"),
            ("foo".to_string(), Some("baz+baz".to_string()))
        );
        assert_eq!(identify_service("Control@Bar"), ("control".to_string(), None));
        assert_eq!(
            identify_service("Dispatch+DPKG_bts@bar"),
            ("dispatch".to_string(), Some("DPKG_bts".to_string()))
        );
    }

    #[test]
    fn package_keyword_split() {
        assert_eq!(split_package_keyword(None), (None, None));
        assert_eq!(split_package_keyword(Some("foo")), (Some("foo"), None));
        assert_eq!(split_package_keyword(Some("foo_bar")), (Some("foo"), Some("bar")));
        assert_eq!(
            split_package_keyword(Some("foo_bar_baz")),
            (Some("foo"), Some("bar_baz"))
        );
    }

    #[test]
    fn domain_match_is_exact_but_case_insensitive() {
        assert!(domain_matches("a@Tracker.Example", "tracker.example"));
        assert!(!domain_matches("a@sub.tracker.example", "tracker.example"));
        assert!(!domain_matches("no-domain", "tracker.example"));
    }
}
