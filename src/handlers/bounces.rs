use anyhow::Result;
use tracing::{info, warn};

use crate::errors::MailProcessorError;
use crate::handlers::TrackerHandler;
use crate::mail::message::Message;

/// Decode the bouncing address from `bounces+<user>=<domain>@...` details.
pub fn decode_bounce_address(details: &str) -> Option<String> {
    let (user, domain) = details.rsplit_once('=')?;
    if user.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some(format!("{user}@{domain}"))
}

/// Count a bounce for the encoded address and drop all of its
/// subscriptions once the threshold is reached.
pub(crate) fn handle(handler: &TrackerHandler, _msg: &Message, details: Option<&str>) -> Result<()> {
    let details = details.filter(|d| !d.is_empty()).ok_or_else(|| {
        MailProcessorError::Failed("bounce address carries no details".to_string())
    })?;
    let email = decode_bounce_address(details).ok_or_else(|| {
        MailProcessorError::Failed(format!("cannot decode bounce details '{details}'"))
    })?;

    let mut store = handler.lock_store();
    let Some(count) = store.record_bounce(&email) else {
        info!(email = %email, "bounce for unknown user ignored");
        return Ok(());
    };

    if count >= handler.bounce_threshold() {
        let dropped = store.unsubscribe_all(&email);
        warn!(
            email = %email,
            bounces = count,
            dropped,
            "bounce threshold reached, unsubscribed from everything"
        );
    } else {
        info!(email = %email, bounces = count, "bounce recorded");
    }

    handler.persist(&store)
}
