use anyhow::Result;
use tracing::{debug, info};

use crate::errors::MailProcessorError;
use crate::handlers::{DEFAULT_KEYWORD, KEYWORD_HEADER, LOOP_HEADER, PACKAGE_HEADER, TrackerHandler};
use crate::mail::message::Message;

/// Forward `msg` to every active subscriber of `package` that accepts the
/// message's keyword.
pub(crate) fn handle(
    handler: &TrackerHandler,
    msg: &Message,
    package: Option<&str>,
    keyword: Option<&str>,
) -> Result<()> {
    let Some(package) = package else {
        return Err(MailProcessorError::Failed("dispatch address names no package".to_string()).into());
    };

    if handler.is_looping(msg, "dispatch") {
        info!(package, "dropping message that already went through dispatch");
        return Ok(());
    }

    let keyword = keyword
        .map(str::to_string)
        .or_else(|| msg.get(KEYWORD_HEADER).map(|k| k.trim().to_lowercase()))
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| DEFAULT_KEYWORD.to_string());

    let recipients: Vec<String> = handler
        .lock_store()
        .subscribers_for(package, &keyword)
        .into_iter()
        .map(str::to_string)
        .collect();

    let loop_marker = handler.service_address("dispatch");
    for email in &recipients {
        let mut copy = msg.clone();
        copy.add_header(LOOP_HEADER, loop_marker.as_str());
        copy.set_header(PACKAGE_HEADER, package);
        copy.set_header(KEYWORD_HEADER, keyword.as_str());
        copy.set_header("To", email.as_str());
        handler.outbox().send(&copy)?;
        debug!(package, keyword = %keyword, to = %email, "forwarded");
    }

    info!(package, keyword = %keyword, recipients = recipients.len(), "dispatched message");
    Ok(())
}
