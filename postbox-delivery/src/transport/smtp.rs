//! Delivery to a single configured relay over SMTP.
//!
//! Each envelope gets its own connection:
//! 1. Connect (TLS from the start for `ssl`) and read the greeting
//! 2. EHLO, then STARTTLS and EHLO again for `tls`
//! 3. AUTH when credentials are configured
//! 4. MAIL FROM, RCPT TO per recipient, DATA
//! 5. QUIT, whose failure is only logged since the message was accepted

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use postbox_smtp::client::{self, Credentials, Response, SmtpClient};
use postbox_tracing::traced;

use super::{Envelope, Transport};
use crate::{
    config::{Encryption, MailerConfig},
    error::{ConfigurationFailure, DeliveryFailure},
};

#[derive(Debug, Clone)]
pub struct SmtpTransport {
    server: String,
    host: String,
    helo_domain: String,
    encryption: Encryption,
    credentials: Option<Credentials>,
    accept_invalid_certs: bool,
    timeout: Option<Duration>,
}

impl SmtpTransport {
    pub fn new(config: &MailerConfig) -> Self {
        let credentials = config
            .username
            .as_ref()
            .zip(config.password.as_ref())
            .map(|(username, password)| Credentials::new(username, password));

        Self {
            server: config.server_address(),
            host: config.host.clone(),
            helo_domain: config.domain.clone(),
            encryption: config.encryption,
            credentials,
            accept_invalid_certs: config.accept_invalid_certs,
            timeout: config.command_timeout(),
        }
    }

    /// Run one client call, bounded by the command timeout if there is one.
    async fn step<T>(
        &self,
        name: &'static str,
        call: impl Future<Output = client::Result<T>>,
    ) -> Result<T, DeliveryFailure> {
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| DeliveryFailure::Timeout(name))?,
            None => call.await,
        };

        Ok(result?)
    }

    /// Connect and read a successful greeting.
    async fn open(&self) -> Result<SmtpClient, DeliveryFailure> {
        let connect = async {
            match self.encryption {
                Encryption::Ssl => {
                    SmtpClient::connect_tls(&self.server, self.host.clone(), self.accept_invalid_certs)
                        .await
                }
                Encryption::None | Encryption::Tls => SmtpClient::connect(&self.server, self.host.clone())
                    .await
                    .map(|client| client.accept_invalid_certs(self.accept_invalid_certs)),
            }
        };

        let mut client = self.step("connect", connect).await.map_err(|e| match e {
            DeliveryFailure::Timeout(_) | DeliveryFailure::Tls(_) => e,
            other => DeliveryFailure::Connect {
                server: self.server.clone(),
                reason: other.to_string(),
            },
        })?;

        self.step("greeting", client.read_greeting())
            .await?
            .expect_success()?;

        Ok(client)
    }

    /// EHLO, upgrading with STARTTLS when configured. Returns the EHLO reply
    /// that describes the session we will actually use.
    async fn handshake(&self, client: &mut SmtpClient) -> Result<Response, DeliveryFailure> {
        let ehlo = self
            .step("EHLO", client.ehlo(&self.helo_domain))
            .await?
            .expect_success()?;

        if self.encryption != Encryption::Tls {
            return Ok(ehlo);
        }

        if !ehlo.has_extension("STARTTLS") {
            return Err(DeliveryFailure::Tls(format!(
                "{} does not offer STARTTLS",
                self.server
            )));
        }

        self.step("STARTTLS", client.starttls()).await?;
        tracing::debug!(server = %self.server, "TLS negotiated via STARTTLS");

        Ok(self
            .step("EHLO", client.ehlo(&self.helo_domain))
            .await?
            .expect_success()?)
    }

    async fn transmit(
        &self,
        client: &mut SmtpClient,
        envelope: &Envelope,
    ) -> Result<(), DeliveryFailure> {
        let ehlo = self.handshake(client).await?;

        if let Some(credentials) = &self.credentials {
            self.step("AUTH", client.authenticate(credentials, &ehlo))
                .await?;
        }

        let size = ehlo.has_extension("SIZE").then_some(envelope.data.len());
        self.step("MAIL FROM", client.mail_from(&envelope.sender, size))
            .await?
            .expect_success()?;

        for recipient in &envelope.recipients {
            self.step("RCPT TO", client.rcpt_to(recipient))
                .await?
                .expect_success()?;
        }

        self.step("DATA", client.data()).await?.expect(354)?;
        self.step("DATA", client.send_data(&envelope.data))
            .await?
            .expect_success()?;

        Ok(())
    }

    /// Close politely. The outcome no longer matters to the caller.
    async fn quit(&self, client: &mut SmtpClient) {
        if let Err(e) = self.step("QUIT", client.quit()).await {
            tracing::warn!(server = %self.server, "QUIT failed: {e}");
        }
    }

    /// Connect, read the greeting and disconnect.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationFailure::Unreachable`] if the relay cannot be
    /// reached or does not greet us.
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(server = %self.server)))]
    pub async fn check(&self) -> Result<(), ConfigurationFailure> {
        let mut client = self
            .open()
            .await
            .map_err(|e| ConfigurationFailure::Unreachable {
                server: self.server.clone(),
                reason: e.to_string(),
            })?;
        self.quit(&mut client).await;

        Ok(())
    }

    /// Deliver `envelope` over a fresh connection.
    ///
    /// # Errors
    ///
    /// Returns the first [`DeliveryFailure`] of the transaction.
    #[traced(
        instrument(level = tracing::Level::DEBUG, skip_all, fields(server = %self.server, recipients = envelope.recipients.len())),
        timing(precision = "ms")
    )]
    pub async fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryFailure> {
        let mut client = self.open().await?;

        let outcome = self.transmit(&mut client, envelope).await;
        // After a refusal the relay is still talking to us; anything else
        // leaves the connection in an unknown state
        if matches!(
            outcome,
            Ok(()) | Err(DeliveryFailure::Rejected { .. } | DeliveryFailure::Authentication(_))
        ) {
            self.quit(&mut client).await;
        }

        outcome
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn verify(&self) -> Result<(), ConfigurationFailure> {
        self.check().await
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), DeliveryFailure> {
        self.deliver(envelope).await
    }
}
