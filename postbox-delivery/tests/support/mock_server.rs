//! A relay that answers from a script and records what it was sent.
#![allow(dead_code)]

use std::{
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

/// One thing the relay received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayCommand {
    Ehlo(String),
    Auth(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// The message itself, still dot-stuffed, without the final `.` line.
    Message(String),
    Quit,
    StartTls,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    fn line(&self) -> String {
        format!("{} {}\r\n", self.code, self.text)
    }
}

#[derive(Clone)]
struct Script {
    greeting: Reply,
    capabilities: Vec<String>,
    auth: Reply,
    mail_from: Reply,
    rcpt_to: Reply,
    data: Reply,
    data_end: Reply,
    hang_after: Option<usize>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mock.relay ESMTP"),
            capabilities: vec!["mock.relay".to_string(), "SIZE 10000000".to_string()],
            auth: Reply::new(235, "2.7.0 Authentication successful"),
            mail_from: Reply::new(250, "OK"),
            rcpt_to: Reply::new(250, "OK"),
            data: Reply::new(354, "End data with <CR><LF>.<CR><LF>"),
            data_end: Reply::new(250, "OK: queued"),
            hang_after: None,
        }
    }
}

impl Script {
    fn ehlo(&self) -> String {
        let mut reply = String::new();
        let last = self.capabilities.len().saturating_sub(1);

        for (i, capability) in self.capabilities.iter().enumerate() {
            let separator = if i == last { ' ' } else { '-' };
            let _ = write!(reply, "250{separator}{capability}\r\n");
        }

        reply
    }
}

pub struct MockRelay {
    addr: SocketAddr,
    received: Arc<RwLock<Vec<RelayCommand>>>,
    connections: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl MockRelay {
    pub fn builder() -> MockRelayBuilder {
        MockRelayBuilder {
            script: Script::default(),
        }
    }

    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn received(&self) -> Vec<RelayCommand> {
        self.received.read().await.clone()
    }

    /// Every message body the relay accepted, in order.
    pub async fn messages(&self) -> Vec<String> {
        self.received
            .read()
            .await
            .iter()
            .filter_map(|command| match command {
                RelayCommand::Message(body) => Some(body.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn reply(writer: &mut (impl AsyncWriteExt + Unpin), text: &str) -> std::io::Result<()> {
        writer.write_all(text.as_bytes()).await?;
        writer.flush().await
    }

    async fn session(
        mut stream: TcpStream,
        script: Arc<Script>,
        received: Arc<RwLock<Vec<RelayCommand>>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut handled = 0;

        Self::reply(&mut writer, &script.greeting.line()).await?;

        loop {
            if script.hang_after.is_some_and(|limit| handled >= limit) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(());
            }

            line.clear();
            let Ok(read) = timeout(Duration::from_secs(10), reader.read_line(&mut line)).await
            else {
                return Ok(());
            };
            if read? == 0 {
                return Ok(());
            }
            handled += 1;

            let text = line.trim_end().to_string();
            let (verb, rest) = text.split_once(' ').unwrap_or((text.as_str(), ""));

            let (command, response) = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => (RelayCommand::Ehlo(rest.to_string()), script.ehlo()),
                "AUTH" => (RelayCommand::Auth(rest.to_string()), script.auth.line()),
                "MAIL" => (RelayCommand::MailFrom(rest.to_string()), script.mail_from.line()),
                "RCPT" => (RelayCommand::RcptTo(rest.to_string()), script.rcpt_to.line()),
                "DATA" => (RelayCommand::Data, script.data.line()),
                "STARTTLS" => (
                    RelayCommand::StartTls,
                    Reply::new(502, "Not implemented").line(),
                ),
                "QUIT" => {
                    received.write().await.push(RelayCommand::Quit);
                    Self::reply(&mut writer, &Reply::new(221, "Bye").line()).await?;
                    return Ok(());
                }
                _ => (RelayCommand::Other(text.clone()), Reply::new(500, "Unknown").line()),
            };

            let starts_data = command == RelayCommand::Data && script.data.code == 354;
            received.write().await.push(command);
            Self::reply(&mut writer, &response).await?;

            if !starts_data {
                continue;
            }

            let mut body = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).await? == 0 {
                    return Ok(());
                }
                if line == ".\r\n" {
                    break;
                }
                body.push_str(&line);
            }

            received.write().await.push(RelayCommand::Message(body));
            Self::reply(&mut writer, &script.data_end.line()).await?;
        }
    }
}

pub struct MockRelayBuilder {
    script: Script,
}

impl MockRelayBuilder {
    /// Replace the EHLO capability lines. The first one is the greeting.
    #[must_use]
    pub fn capabilities(mut self, capabilities: &[&str]) -> Self {
        self.script.capabilities = capabilities.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn auth_reply(mut self, code: u16, text: &str) -> Self {
        self.script.auth = Reply::new(code, text);
        self
    }

    #[must_use]
    pub fn rcpt_reply(mut self, code: u16, text: &str) -> Self {
        self.script.rcpt_to = Reply::new(code, text);
        self
    }

    #[must_use]
    pub fn data_end_reply(mut self, code: u16, text: &str) -> Self {
        self.script.data_end = Reply::new(code, text);
        self
    }

    /// Stop answering after `commands` commands on each connection.
    #[must_use]
    pub const fn hang_after(mut self, commands: usize) -> Self {
        self.script.hang_after = Some(commands);
        self
    }

    pub async fn start(self) -> std::io::Result<MockRelay> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let script = Arc::new(self.script);
        let received = Arc::new(RwLock::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        {
            let received = Arc::clone(&received);
            let connections = Arc::clone(&connections);
            let shutdown = Arc::clone(&shutdown);

            tokio::spawn(async move {
                while !shutdown.load(Ordering::Relaxed) {
                    let Ok(Ok((stream, _))) =
                        timeout(Duration::from_millis(100), listener.accept()).await
                    else {
                        continue;
                    };

                    connections.fetch_add(1, Ordering::Relaxed);
                    let (script, received) = (Arc::clone(&script), Arc::clone(&received));
                    tokio::spawn(async move {
                        if let Err(e) = MockRelay::session(stream, script, received).await {
                            tracing::debug!("Mock relay session ended: {e}");
                        }
                    });
                }
            });
        }

        Ok(MockRelay {
            addr,
            received,
            connections,
            shutdown,
        })
    }
}
