//! SASL credentials for `AUTH PLAIN` and `AUTH LOGIN`.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};

/// SASL mechanisms the client can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    Plain,
    Login,
}

impl AuthMechanism {
    /// Pick the mechanism to use from those a server advertises,
    /// preferring `PLAIN` (one round trip).
    #[must_use]
    pub fn negotiate(offered: &[String]) -> Option<Self> {
        let offers = |name: &str| offered.iter().any(|m| m.eq_ignore_ascii_case(name));

        if offers("PLAIN") {
            Some(Self::Plain)
        } else if offers("LOGIN") {
            Some(Self::Login)
        } else {
            None
        }
    }
}

/// A username and password pair.
///
/// The password never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The initial response for `AUTH PLAIN` (RFC 4616): an empty
    /// authorisation identity, then user and password, NUL separated.
    #[must_use]
    pub fn plain_token(&self) -> String {
        STANDARD.encode(format!("\0{}\0{}", self.username, self.password))
    }

    /// The two responses sent during `AUTH LOGIN`.
    #[must_use]
    pub fn login_tokens(&self) -> (String, String) {
        (STANDARD.encode(&self.username), STANDARD.encode(&self.password))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn plain_token_matches_rfc_layout() {
        let creds = Credentials::new("tim", "tanstaaftanstaaf");
        assert_eq!(creds.plain_token(), "AHRpbQB0YW5zdGFhZnRhbnN0YWFm");
    }

    #[test]
    fn login_tokens_encode_each_part() {
        let creds = Credentials::new("user", "pass");
        assert_eq!(
            creds.login_tokens(),
            ("dXNlcg==".to_string(), "cGFzcw==".to_string())
        );
    }

    #[test]
    fn debug_hides_password() {
        let creds = Credentials::new("user", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("user"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn negotiation_prefers_plain() {
        let offered = vec!["LOGIN".to_string(), "PLAIN".to_string()];
        assert_eq!(AuthMechanism::negotiate(&offered), Some(AuthMechanism::Plain));

        let offered = vec!["login".to_string()];
        assert_eq!(AuthMechanism::negotiate(&offered), Some(AuthMechanism::Login));

        assert_eq!(AuthMechanism::negotiate(&["CRAM-MD5".to_string()]), None);
    }
}
