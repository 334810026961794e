use std::{num::NonZeroUsize, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationFailure;

const fn default_queue_capacity() -> usize {
    100
}

fn default_host() -> String {
    "localhost".to_string()
}

const fn default_port() -> u16 {
    1025
}

fn default_from_name() -> String {
    "Info".to_string()
}

fn default_from_address() -> String {
    "info@localhost".to_string()
}

fn default_template_dir() -> PathBuf {
    PathBuf::from("./templates")
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("./tmp")
}

const fn default_verify_on_start() -> bool {
    true
}

/// How the connection to the relay is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encryption {
    /// Plain text for the whole session.
    #[default]
    None,
    /// Connect in plain text and upgrade with STARTTLS, which the relay
    /// must offer.
    Tls,
    /// TLS from the first byte (SMTPS).
    Ssl,
}

/// Mailer configuration.
///
/// ```ron
/// (
///     host: "smtp.example.com",
///     port: 587,
///     encryption: tls,
///     username: Some("mailer"),
///     password: Some("secret"),
///     from_address: "info@example.com",
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailerConfig {
    /// Name announced in EHLO.
    #[serde(default = "default_host")]
    pub domain: String,

    /// The relay. Also the name its TLS certificate is checked against.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub encryption: Encryption,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_from_name")]
    pub from_name: String,

    #[serde(default = "default_from_address")]
    pub from_address: String,

    /// Capacity of the job queue. Fixed for the lifetime of the mailer.
    ///
    /// Default: 100
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Where `{name}.plain.tera` / `{name}.html.tera` templates live.
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,

    /// Where producers write generated files such as manuals.
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,

    /// Upper bound for each SMTP step, in seconds.
    ///
    /// Default: None (a stuck relay blocks the dispatcher)
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,

    /// Accept invalid TLS certificates (for testing only).
    ///
    /// Default: `false`
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Connect to the relay once at startup and fail fast if it is
    /// unreachable.
    #[serde(default = "default_verify_on_start")]
    pub verify_on_start: bool,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            domain: default_host(),
            host: default_host(),
            port: default_port(),
            encryption: Encryption::default(),
            username: None,
            password: None,
            from_name: default_from_name(),
            from_address: default_from_address(),
            queue_capacity: default_queue_capacity(),
            template_dir: default_template_dir(),
            tmp_dir: default_tmp_dir(),
            command_timeout_secs: None,
            accept_invalid_certs: false,
            verify_on_start: default_verify_on_start(),
        }
    }
}

impl MailerConfig {
    /// Check the values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationFailure::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigurationFailure> {
        let invalid = |reason: &str| Err(ConfigurationFailure::Invalid(reason.to_string()));

        if self.host.trim().is_empty() {
            return invalid("host must not be empty");
        }
        if self.port == 0 {
            return invalid("port must not be 0");
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be at least 1");
        }
        if !self.from_address.contains('@') {
            return invalid("from_address must be an email address");
        }
        if self.from_address.contains(['\r', '\n']) || self.from_name.contains(['\r', '\n']) {
            return invalid("from_name and from_address must be a single line");
        }
        if self.username.is_some() != self.password.is_some() {
            return invalid("username and password must be set together");
        }
        if self.command_timeout_secs == Some(0) {
            return invalid("command_timeout_secs must be at least 1");
        }

        Ok(())
    }

    /// The queue capacity as a `NonZeroUsize`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationFailure::Invalid`] when it is zero.
    pub fn capacity(&self) -> Result<NonZeroUsize, ConfigurationFailure> {
        NonZeroUsize::new(self.queue_capacity).ok_or_else(|| {
            ConfigurationFailure::Invalid("queue_capacity must be at least 1".to_string())
        })
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    /// `host:port` as passed to the socket layer.
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The `From` header value for the configured identity.
    pub fn from_header(&self) -> String {
        mailbox(&self.from_name, &self.from_address)
    }
}

/// `Name <address>`, or just the address when there is no name.
pub(crate) fn mailbox(name: &str, address: &str) -> String {
    if name.trim().is_empty() {
        address.to_string()
    } else {
        format!("{name} <{address}>")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: MailerConfig = ron::from_str("()").unwrap();
        assert_eq!(config, MailerConfig::default());
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.server_address(), "localhost:1025");
        assert_eq!(config.from_header(), "Info <info@localhost>");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn encryption_parses_lowercase() {
        let config: MailerConfig =
            ron::from_str("(encryption: ssl, port: 465, command_timeout_secs: Some(30))").unwrap();
        assert_eq!(config.encryption, Encryption::Ssl);
        assert_eq!(config.command_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn validation_catches_bad_values() {
        let cases = [
            MailerConfig {
                queue_capacity: 0,
                ..MailerConfig::default()
            },
            MailerConfig {
                port: 0,
                ..MailerConfig::default()
            },
            MailerConfig {
                username: Some("user".to_string()),
                ..MailerConfig::default()
            },
            MailerConfig {
                from_address: "nobody".to_string(),
                ..MailerConfig::default()
            },
            MailerConfig {
                from_name: "Info\r\nBcc: evil@example.com".to_string(),
                ..MailerConfig::default()
            },
        ];

        for config in cases {
            assert!(
                matches!(config.validate(), Err(ConfigurationFailure::Invalid(_))),
                "{config:?} should be invalid"
            );
        }
    }

    #[test]
    fn unnamed_sender_is_bare_address() {
        assert_eq!(mailbox("", "a@example.com"), "a@example.com");
    }
}
