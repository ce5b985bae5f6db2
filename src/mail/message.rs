//! Minimal RFC 5322 message model.
//!
//! Only what the processor and the handlers need: ordered, repeatable
//! headers with case-insensitive lookup, folded header lines, and an opaque
//! body. MIME structure is left untouched.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::MailProcessorError;

static ANGLE_ADDR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"<([^<>\s]+@[^<>\s]+)>").ok());

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse raw bytes as read from a maildir file.
    ///
    /// Accepts both `\n` and `\r\n` line endings. Header bytes that are not
    /// UTF-8 are replaced with U+FFFD. Fails on an empty input, a
    /// continuation line with no header before it, or a header line without
    /// a `name:` prefix.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, MailProcessorError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(MailProcessorError::MalformedMessage(
                "message is empty".to_string(),
            ));
        }

        let (head, body) = split_head_body(raw);
        // Undecodable bytes become U+FFFD.
        let head = String::from_utf8_lossy(head);

        let mut headers: Vec<(String, String)> = Vec::new();
        for (lineno, line) in head.lines().enumerate() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                continue;
            }

            if line.starts_with([' ', '\t']) {
                let Some((_, value)) = headers.last_mut() else {
                    return Err(MailProcessorError::MalformedMessage(format!(
                        "line {}: continuation without a header",
                        lineno + 1
                    )));
                };
                let cont = line.trim();
                if !cont.is_empty() {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(cont);
                }
                continue;
            }

            match line.split_once(':') {
                Some((name, value))
                    if !name.is_empty() && !name.contains(char::is_whitespace) =>
                {
                    headers.push((name.to_string(), value.trim().to_string()));
                }
                _ => {
                    return Err(MailProcessorError::MalformedMessage(format!(
                        "line {}: not a header field: {:?}",
                        lineno + 1,
                        line
                    )));
                }
            }
        }

        Ok(Self {
            headers,
            body: body.to_vec(),
        })
    }

    /// Append a header; existing fields with the same name are kept.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Replace every occurrence of `name` with a single field.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.remove_header(name);
        self.add_header(name, value);
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// First value of `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of `name`, in message order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    /// Serialize with `\n` line endings.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 64 * self.headers.len());
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out
    }
}

/// Pull the bare address out of a header value.
///
/// Handles `Name <user@host>` as well as a plain `user@host`. Returns `None`
/// when no address can be recognized.
pub fn parse_address(value: &str) -> Option<String> {
    if let Some(caps) = ANGLE_ADDR.as_ref().and_then(|re| re.captures(value)) {
        return Some(caps[1].to_string());
    }

    let value = value.trim();
    let (local, domain) = value.split_once('@')?;
    if local.is_empty()
        || domain.is_empty()
        || domain.contains('@')
        || value.contains(char::is_whitespace)
    {
        return None;
    }
    Some(value.to_string())
}

fn split_head_body(raw: &[u8]) -> (&[u8], &[u8]) {
    let mut line_start = 0;
    for (i, byte) in raw.iter().enumerate() {
        if *byte != b'\n' {
            continue;
        }
        let line = &raw[line_start..i];
        if line.is_empty() || line == b"\r" {
            return (&raw[..line_start], &raw[i + 1..]);
        }
        line_start = i + 1;
    }
    (raw, &raw[raw.len()..])
}
