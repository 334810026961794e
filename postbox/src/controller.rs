use std::path::{Path, PathBuf};

use postbox_common::{internal, logging, tracing};
use postbox_delivery::{
    DispatchStats, MailError, Mailer, MailerConfig, MemoryTransport, Message, Plan, User, producer,
};
use postbox_tracing::traced;
use serde::Deserialize;
use serde_json::Value;

/// Top level of `postbox.config.ron`.
#[derive(Debug, Default, Deserialize)]
pub struct Postbox {
    #[serde(alias = "mail", default)]
    pub mailer: MailerConfig,
}

/// One message described on the command line.
#[derive(Debug, Clone, Default)]
pub struct Outgoing {
    pub to: String,
    pub subject: String,
    pub body: Option<String>,
    pub template: Option<String>,
    /// JSON for the template context. Anything that is not valid JSON is
    /// passed as a plain string.
    pub data: Option<String>,
    pub attachments: Vec<(String, PathBuf)>,
}

impl Outgoing {
    /// # Errors
    ///
    /// Fails when the recipient or subject are unusable.
    pub fn into_message(self) -> anyhow::Result<Message> {
        let data = self.data.map_or(Value::Null, |raw| {
            serde_json::from_str(&raw).unwrap_or(Value::String(raw))
        });

        let mut message = match (self.template, self.body) {
            (Some(template), _) => Message::templated(self.to, self.subject, template, data)?,
            (None, body) => Message::plain(self.to, self.subject, body.unwrap_or_default())?,
        };
        for (name, path) in self.attachments {
            message = message.with_attachment(name, path)?;
        }

        Ok(message)
    }
}

/// Parse `NAME=PATH`, or a bare path whose file name becomes the name.
///
/// # Errors
///
/// Fails on an empty name or path.
pub fn parse_attachment(value: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = match value.split_once('=') {
        Some((name, path)) => (name.to_string(), PathBuf::from(path)),
        None => {
            let path = PathBuf::from(value);
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            (name, path)
        }
    };

    if name.is_empty() || path.as_os_str().is_empty() {
        return Err(format!("expected NAME=PATH, got '{value}'"));
    }

    Ok((name, path))
}

/// Find the configuration file using the following precedence:
/// 1. `POSTBOX_CONFIG` environment variable
/// 2. ./postbox.config.ron (current working directory)
/// 3. /etc/postbox/postbox.config.ron (system-wide config)
///
/// # Errors
///
/// Fails if `POSTBOX_CONFIG` names a missing file or nothing is found.
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    locate_config(
        std::env::var_os("POSTBOX_CONFIG").map(PathBuf::from),
        &[
            PathBuf::from("./postbox.config.ron"),
            PathBuf::from("/etc/postbox/postbox.config.ron"),
        ],
    )
}

/// [`find_config_file`] with the environment and search paths supplied.
///
/// # Errors
///
/// See [`find_config_file`].
pub fn locate_config(explicit: Option<PathBuf>, defaults: &[PathBuf]) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "POSTBOX_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - POSTBOX_CONFIG environment variable\n{paths_tried}"
    )
}

/// Wait for SIGINT or SIGTERM.
#[traced(instrument(level = tracing::Level::TRACE))]
async fn termination() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, shutting down");
        }
    }

    Ok(())
}

impl Postbox {
    /// Read and parse a RON configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or does not parse.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {e}", path.display())
        })?;

        Self::from_ron(&content)
    }

    /// # Errors
    ///
    /// Fails if `content` is not a valid configuration.
    pub fn from_ron(content: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(content)?)
    }

    async fn start(self, dry_run: Option<MemoryTransport>) -> anyhow::Result<Mailer> {
        let builder = Mailer::builder(self.mailer);
        let builder = match dry_run {
            Some(transport) => builder.transport(std::sync::Arc::new(transport)),
            None => builder,
        };

        Ok(builder.start().await?)
    }

    /// Serve until SIGINT or SIGTERM, then shut down gracefully. A second
    /// CTRL+C abandons whatever is still queued.
    ///
    /// # Errors
    ///
    /// Fails if the mailer cannot start, or shutdown was forced.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err), timing(precision = "s"))]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let mailer = self.start(None).await?;
        internal!(level = INFO, "Controller running");

        termination().await?;

        tokio::select! {
            stats = mailer.request_shutdown() => {
                internal!(
                    level = INFO,
                    "Shut down: {} delivered, {} failed",
                    stats.delivered,
                    stats.failed
                );
                Ok(())
            }
            _ = tokio::signal::ctrl_c() => {
                anyhow::bail!("Shutdown forced with {} messages still queued", mailer.queue_len())
            }
        }
    }

    /// Queue one message, then shut down once it has been handled.
    ///
    /// With `dry_run` the message goes to `dry_run` instead of the relay.
    ///
    /// # Errors
    ///
    /// Fails if the mailer cannot start or any failure was recorded.
    pub async fn send(
        self,
        outgoing: Outgoing,
        dry_run: Option<MemoryTransport>,
    ) -> anyhow::Result<DispatchStats> {
        let message = outgoing.into_message()?;
        let mailer = self.start(dry_run).await?;

        mailer.run_producer("send", move |mailer| async move {
            mailer.submit(message).await?;
            Ok::<_, MailError>(())
        })?;

        finish(&mailer).await
    }

    /// Run the subscription producers for `user`, then shut down once
    /// their messages have been handled.
    ///
    /// # Errors
    ///
    /// Fails if the mailer cannot start or any failure was recorded.
    pub async fn subscribe(
        self,
        user: User,
        plan: Plan,
        dry_run: Option<MemoryTransport>,
    ) -> anyhow::Result<DispatchStats> {
        let mailer = self.start(dry_run).await?;
        producer::subscribe(&mailer, &user, &plan)?;

        finish(&mailer).await
    }
}

async fn finish(mailer: &Mailer) -> anyhow::Result<DispatchStats> {
    let stats = mailer.request_shutdown().await;

    match mailer.failures_recorded() {
        0 => Ok(stats),
        failures => anyhow::bail!("{failures} failure(s) recorded, see the log for details"),
    }
}
