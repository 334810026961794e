//! Email message builder with support for headers, alternative bodies, and
//! MIME attachments.

use std::{
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

use base64::{Engine, engine::general_purpose::STANDARD};

use super::error::{ClientError, Result};

/// Maximum length of a base64 line inside a MIME part.
const BASE64_LINE: usize = 76;

static BOUNDARY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An email attachment with filename, content type, and data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// The filename to use in the MIME header.
    pub filename: String,
    /// The MIME content type (e.g., "application/pdf").
    pub content_type: String,
    /// The attachment data.
    pub data: Vec<u8>,
}

/// Builder for constructing email messages with proper MIME formatting.
///
/// Depending on what is supplied, the result is one of:
///
/// - a single `text/plain` part
/// - `multipart/alternative` when an HTML body is given
/// - `multipart/mixed` when there are attachments, with the body (or the
///   alternative pair) as its first part
///
/// # Examples
///
/// ```no_run
/// use postbox_smtp::client::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("Info <info@example.com>")
///     .to("recipient@example.com")
///     .subject("Hello")
///     .body("This is the message body")
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    cc: Vec<String>,
    subject: Option<String>,
    headers: Vec<(String, String)>,
    body: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the From header. Either a bare address or `Name <address>`.
    #[must_use]
    pub fn from(mut self, mailbox: impl Into<String>) -> Self {
        self.from = Some(mailbox.into());
        self
    }

    /// Adds a recipient to the To header.
    #[must_use]
    pub fn to(mut self, email: impl Into<String>) -> Self {
        self.to.push(email.into());
        self
    }

    /// Adds a recipient to the Cc header.
    #[must_use]
    pub fn cc(mut self, email: impl Into<String>) -> Self {
        self.cc.push(email.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Adds a custom header. Headers are written in insertion order.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the plain-text body.
    #[must_use]
    pub fn body(mut self, content: impl Into<String>) -> Self {
        self.body = Some(content.into());
        self
    }

    /// Sets an HTML alternative to the plain-text body.
    #[must_use]
    pub fn html(mut self, content: impl Into<String>) -> Self {
        self.html = Some(content.into());
        self
    }

    /// Adds a file attachment from raw data.
    #[must_use]
    pub fn attach(
        mut self,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        self.attachments.push(Attachment {
            filename: filename.into(),
            content_type: content_type.into(),
            data,
        });
        self
    }

    /// Builds the final message text, CRLF terminated throughout.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Compose`] if there is no sender or no
    /// recipient.
    pub fn build(self) -> Result<String> {
        let from = self
            .from
            .as_deref()
            .ok_or_else(|| ClientError::Compose("missing From address".to_string()))?;
        if self.to.is_empty() && self.cc.is_empty() {
            return Err(ClientError::Compose("message has no recipients".to_string()));
        }

        let mut message = String::with_capacity(2048);

        push_header(
            &mut message,
            "Date",
            &chrono::Utc::now().to_rfc2822(),
        );
        push_header(&mut message, "From", from);
        if !self.to.is_empty() {
            push_header(&mut message, "To", &self.to.join(", "));
        }
        if !self.cc.is_empty() {
            push_header(&mut message, "Cc", &self.cc.join(", "));
        }
        if let Some(subject) = &self.subject {
            push_header(&mut message, "Subject", &encode_header_value(subject));
        }
        for (name, value) in &self.headers {
            push_header(&mut message, name, value);
        }
        push_header(&mut message, "MIME-Version", "1.0");

        let body = self.body.as_deref().unwrap_or_default();

        if self.attachments.is_empty() {
            self.push_body(&mut message, body);
            return Ok(message);
        }

        let boundary = generate_boundary();
        push_header(
            &mut message,
            "Content-Type",
            &format!("multipart/mixed; boundary=\"{boundary}\""),
        );
        message.push_str("\r\n");

        message.push_str(&format!("--{boundary}\r\n"));
        self.push_body(&mut message, body);
        message.push_str("\r\n");

        for attachment in &self.attachments {
            message.push_str(&format!("--{boundary}\r\n"));
            push_header(&mut message, "Content-Type", &attachment.content_type);
            push_header(&mut message, "Content-Transfer-Encoding", "base64");
            push_header(
                &mut message,
                "Content-Disposition",
                &format!("attachment; filename=\"{}\"", attachment.filename),
            );
            message.push_str("\r\n");
            message.push_str(&wrap_base64(&attachment.data));
        }

        message.push_str(&format!("--{boundary}--\r\n"));

        Ok(message)
    }

    /// Writes the content headers and the text (or alternative) body.
    fn push_body(&self, message: &mut String, body: &str) {
        let Some(html) = &self.html else {
            push_text_part(message, "text/plain", body);
            return;
        };

        let boundary = generate_boundary();
        push_header(
            message,
            "Content-Type",
            &format!("multipart/alternative; boundary=\"{boundary}\""),
        );
        message.push_str("\r\n");

        message.push_str(&format!("--{boundary}\r\n"));
        push_text_part(message, "text/plain", body);
        message.push_str("\r\n");
        message.push_str(&format!("--{boundary}\r\n"));
        push_text_part(message, "text/html", html);
        message.push_str("\r\n");
        message.push_str(&format!("--{boundary}--\r\n"));
    }
}

fn push_header(message: &mut String, name: &str, value: &str) {
    message.push_str(name);
    message.push_str(": ");
    message.push_str(value);
    message.push_str("\r\n");
}

fn push_text_part(message: &mut String, mime: &str, text: &str) {
    push_header(message, "Content-Type", &format!("{mime}; charset=utf-8"));
    push_header(message, "Content-Transfer-Encoding", "8bit");
    message.push_str("\r\n");
    message.push_str(&normalise_line_endings(text));
}

fn normalise_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}

/// RFC 2047 encoded-word for header values that are not plain ASCII.
fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?utf-8?B?{}?=", STANDARD.encode(value))
    }
}

/// Generates a unique MIME boundary string.
fn generate_boundary() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let sequence = BOUNDARY_COUNTER.fetch_add(1, Ordering::Relaxed);

    format!("----=_Part_{timestamp}_{sequence}")
}

/// Encodes data as base64 with line wrapping at 76 characters.
fn wrap_base64(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE * 2 + 2);

    for line in encoded.as_bytes().chunks(BASE64_LINE) {
        // base64 output is always ASCII
        wrapped.push_str(&String::from_utf8_lossy(line));
        wrapped.push_str("\r\n");
    }

    wrapped
}

/// Guesses the MIME content type based on file extension.
#[must_use]
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    match extension.to_lowercase().as_str() {
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "zip" => "application/zip",
        "json" => "application/json",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use mailparse::{MailHeaderMap, parse_mail};

    use super::*;

    #[test]
    fn test_simple_message() {
        let message = MessageBuilder::new()
            .from("Info <info@example.com>")
            .to("recipient@example.com")
            .subject("Test")
            .body("Hello World")
            .build()
            .unwrap();

        let parsed = parse_mail(message.as_bytes()).unwrap();
        assert_eq!(
            parsed.headers.get_first_value("From").unwrap(),
            "Info <info@example.com>"
        );
        assert_eq!(parsed.headers.get_first_value("Subject").unwrap(), "Test");
        assert!(parsed.headers.get_first_value("Date").is_some());
        assert_eq!(parsed.ctype.mimetype, "text/plain");
        assert_eq!(parsed.get_body().unwrap().trim(), "Hello World");
    }

    #[test]
    fn test_missing_parts_are_rejected() {
        assert!(matches!(
            MessageBuilder::new().to("a@example.com").build(),
            Err(ClientError::Compose(_))
        ));
        assert!(matches!(
            MessageBuilder::new().from("a@example.com").build(),
            Err(ClientError::Compose(_))
        ));
    }

    #[test]
    fn test_multiple_recipients() {
        let message = MessageBuilder::new()
            .from("sender@example.com")
            .to("recipient1@example.com")
            .to("recipient2@example.com")
            .build()
            .unwrap();

        assert!(message.contains("To: recipient1@example.com, recipient2@example.com\r\n"));
    }

    #[test]
    fn test_html_alternative() {
        let message = MessageBuilder::new()
            .from("sender@example.com")
            .to("recipient@example.com")
            .body("plain")
            .html("<p>rich</p>")
            .build()
            .unwrap();

        let parsed = parse_mail(message.as_bytes()).unwrap();
        assert_eq!(parsed.ctype.mimetype, "multipart/alternative");
        assert_eq!(parsed.subparts.len(), 2);
        assert_eq!(parsed.subparts[0].ctype.mimetype, "text/plain");
        assert_eq!(parsed.subparts[1].ctype.mimetype, "text/html");
        assert_eq!(parsed.subparts[1].get_body().unwrap().trim(), "<p>rich</p>");
    }

    #[test]
    fn test_with_attachment() {
        let data = vec![7u8; 200];
        let message = MessageBuilder::new()
            .from("sender@example.com")
            .to("recipient@example.com")
            .subject("Test")
            .body("See attachment")
            .html("<b>See attachment</b>")
            .attach("Manual.pdf", "application/pdf", data.clone())
            .build()
            .unwrap();

        let parsed = parse_mail(message.as_bytes()).unwrap();
        assert_eq!(parsed.ctype.mimetype, "multipart/mixed");
        assert_eq!(parsed.subparts.len(), 2);
        assert_eq!(parsed.subparts[0].ctype.mimetype, "multipart/alternative");

        let attachment = &parsed.subparts[1];
        assert_eq!(attachment.ctype.mimetype, "application/pdf");
        assert_eq!(
            attachment
                .get_content_disposition()
                .params
                .get("filename")
                .map(String::as_str),
            Some("Manual.pdf")
        );
        assert_eq!(attachment.get_body_raw().unwrap(), data);
    }

    #[test]
    fn test_base64_lines_are_wrapped() {
        let encoded = wrap_base64(&[0u8; 120]);
        assert!(encoded.lines().all(|line| line.trim_end().len() <= BASE64_LINE));
        assert!(wrap_base64(b"Hello World").starts_with("SGVsbG8gV29ybGQ=\r\n"));
    }

    #[test]
    fn test_non_ascii_subject_is_encoded() {
        let message = MessageBuilder::new()
            .from("sender@example.com")
            .to("recipient@example.com")
            .subject("Grüße")
            .build()
            .unwrap();

        assert!(message.contains("Subject: =?utf-8?B?"));
        let parsed = parse_mail(message.as_bytes()).unwrap();
        assert_eq!(parsed.headers.get_first_value("Subject").unwrap(), "Grüße");
    }

    #[test]
    fn test_custom_headers() {
        let message = MessageBuilder::new()
            .from("sender@example.com")
            .to("recipient@example.com")
            .header("X-Custom-Header", "custom-value")
            .body("Test")
            .build()
            .unwrap();

        assert!(message.contains("X-Custom-Header: custom-value"));
    }

    #[test]
    fn test_content_type_guess() {
        assert_eq!(content_type_for(Path::new("Manual.PDF")), "application/pdf");
        assert_eq!(content_type_for(Path::new("notes")), "application/octet-stream");
    }
}
