//! SMTP client implementation.
//!
//! Supports:
//!
//! - Plain TCP, implicit TLS (`ssl`) and STARTTLS upgrades
//! - `AUTH PLAIN` and `AUTH LOGIN`
//! - Multi-line response parsing and capability inspection
//! - MIME message composition with alternative bodies and attachments
//!
//! # Example
//!
//! ```no_run
//! use postbox_smtp::client::{Credentials, MessageBuilder, SmtpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SmtpClient::connect("localhost:1025", "localhost".to_string()).await?;
//! client.read_greeting().await?;
//! let mut ehlo = client.ehlo("client.example.com").await?;
//! if ehlo.has_extension("STARTTLS") {
//!     client.starttls().await?;
//!     ehlo = client.ehlo("client.example.com").await?;
//! }
//! client.authenticate(&Credentials::new("user", "secret"), &ehlo).await?;
//!
//! let message = MessageBuilder::new()
//!     .from("info@example.com")
//!     .to("user@example.com")
//!     .subject("Hello")
//!     .body("Hi there")
//!     .build()?;
//!
//! client.mail_from("info@example.com", None).await?;
//! client.rcpt_to("user@example.com").await?;
//! client.data().await?;
//! client.send_data(&message).await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod auth;
mod error;
mod message;
mod response;
mod smtp_client;

pub use auth::{AuthMechanism, Credentials};
pub use error::{ClientError, Result};
pub use message::{Attachment, MessageBuilder, content_type_for};
pub use response::{Response, ResponseLine};
pub use smtp_client::SmtpClient;
