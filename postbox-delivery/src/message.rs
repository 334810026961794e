//! The work item handed from producers to the dispatcher.

use std::{collections::BTreeMap, path::PathBuf};

use serde_json::Value;

use crate::error::ProductionFailure;

/// One email to send.
///
/// A message is validated when it is built and never changes once it has
/// been enqueued; the dispatcher only reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    recipient: String,
    subject: String,
    template: Option<String>,
    data: Value,
    attachments: BTreeMap<String, PathBuf>,
    from: Option<String>,
    from_name: Option<String>,
}

impl Message {
    /// Start a message with an empty body.
    ///
    /// # Errors
    ///
    /// Returns [`ProductionFailure::InvalidMessage`] when the recipient is
    /// empty or would break the header it is written into.
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
    ) -> Result<Self, ProductionFailure> {
        let recipient = recipient.into().trim().to_string();
        if recipient.is_empty() {
            return Err(ProductionFailure::InvalidMessage(
                "recipient must not be empty".to_string(),
            ));
        }
        if recipient.contains(['\r', '\n']) {
            return Err(ProductionFailure::InvalidMessage(format!(
                "recipient contains a line break: {recipient:?}"
            )));
        }

        let subject = subject.into();
        if subject.contains(['\r', '\n']) {
            return Err(ProductionFailure::InvalidMessage(
                "subject contains a line break".to_string(),
            ));
        }

        Ok(Self {
            recipient,
            subject,
            template: None,
            data: Value::Null,
            attachments: BTreeMap::new(),
            from: None,
            from_name: None,
        })
    }

    /// A message whose body is `body` verbatim.
    ///
    /// # Errors
    ///
    /// See [`Message::new`].
    pub fn plain(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, ProductionFailure> {
        Ok(Self::new(recipient, subject)?.with_data(Value::String(body.into())))
    }

    /// A message rendered from `template` with `data`.
    ///
    /// # Errors
    ///
    /// See [`Message::new`].
    pub fn templated(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        template: impl Into<String>,
        data: Value,
    ) -> Result<Self, ProductionFailure> {
        Ok(Self::new(recipient, subject)?
            .with_template(template)
            .with_data(data))
    }

    /// Notice sent when someone fails to log in as `recipient`.
    ///
    /// # Errors
    ///
    /// See [`Message::new`].
    pub fn failed_login(recipient: impl Into<String>) -> Result<Self, ProductionFailure> {
        Self::plain(recipient, "Failed log in attempt", "Invalid login attempt!")
    }

    /// Account activation mail carrying an already signed URL.
    ///
    /// # Errors
    ///
    /// See [`Message::new`].
    pub fn activation(
        recipient: impl Into<String>,
        signed_url: impl Into<String>,
    ) -> Result<Self, ProductionFailure> {
        Self::templated(
            recipient,
            "Activate your account",
            "confirmation-email",
            Value::String(signed_url.into()),
        )
    }

    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Attach the file at `path` under the display name `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ProductionFailure::InvalidMessage`] when `name` is empty
    /// or cannot be written into a `filename` parameter.
    pub fn with_attachment(
        mut self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, ProductionFailure> {
        let name = name.into();
        if name.trim().is_empty() || name.contains(['\r', '\n', '"']) {
            return Err(ProductionFailure::InvalidMessage(format!(
                "unusable attachment name: {name:?}"
            )));
        }

        self.attachments.insert(name, path.into());
        Ok(self)
    }

    /// Override the configured sender for this message only.
    ///
    /// # Errors
    ///
    /// Returns [`ProductionFailure::InvalidMessage`] when the address is
    /// empty, or either part would break the `From` header.
    pub fn with_sender(
        mut self,
        address: impl Into<String>,
        name: Option<String>,
    ) -> Result<Self, ProductionFailure> {
        let address = address.into().trim().to_string();
        if address.is_empty() {
            return Err(ProductionFailure::InvalidMessage(
                "sender must not be empty".to_string(),
            ));
        }
        if address.contains(['\r', '\n'])
            || name.as_deref().is_some_and(|name| name.contains(['\r', '\n']))
        {
            return Err(ProductionFailure::InvalidMessage(
                "sender contains a line break".to_string(),
            ));
        }

        self.from = Some(address);
        self.from_name = name;
        Ok(self)
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    pub const fn data(&self) -> &Value {
        &self.data
    }

    pub const fn attachments(&self) -> &BTreeMap<String, PathBuf> {
        &self.attachments
    }

    pub fn sender(&self) -> Option<&str> {
        self.from.as_deref()
    }

    pub fn sender_name(&self) -> Option<&str> {
        self.from_name.as_deref()
    }

    /// The body used when no template is set: a JSON string as-is, any
    /// other value as JSON text, and nothing at all for `null`.
    pub fn body_text(&self) -> String {
        match &self.data {
            Value::Null => String::new(),
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}
