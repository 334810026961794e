//! Outbound SMTP client used by the postbox dispatcher.
//!
//! One [`client::SmtpClient`] is one connection: plain, upgraded with
//! STARTTLS, or wrapped in TLS from the first byte. Messages are composed
//! with [`client::MessageBuilder`].

pub mod client;
