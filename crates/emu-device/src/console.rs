use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::predicates;

/// Connection attempts made while the console port is not bound yet.
const CONNECT_ATTEMPTS: u32 = 5;

/// Pause between refused connection attempts.
const CONNECT_RETRY: Duration = Duration::from_secs(2);

/// How long a single read may wait for more of a reply.
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound for the console to close the session after `exit` or `kill`.
const SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Error from the device control console.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    /// The console port never accepted a connection.
    #[error("connect to console port {port} after {attempts} attempts: {source}")]
    Connect {
        port: u16,
        attempts: u32,
        source: std::io::Error,
    },
    /// The greeting did not end in `OK`.
    #[error("console handshake failed, got: {0}")]
    Handshake(String),
    /// The console rejected the auth token.
    #[error("console auth failed, got: {0}")]
    Auth(String),
    #[error("read auth token {path}: {source}")]
    Token {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("console io: {0}")]
    Io(#[from] std::io::Error),
    #[error("console session did not finish within {0:?}")]
    Timeout(Duration),
}

/// Client for the text control console of one device.
pub struct ConsoleClient {
    port: u16,
    retry_interval: Duration,
}

impl ConsoleClient {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            retry_interval: CONNECT_RETRY,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Connect and authenticate.
    ///
    /// A refused connection is retried, any other connect error fails
    /// immediately.
    pub async fn connect(&self) -> Result<ConsoleSession, ConsoleError> {
        let mut attempts = 0;
        let stream = loop {
            attempts += 1;
            match TcpStream::connect(("127.0.0.1", self.port)).await {
                Ok(stream) => break stream,
                Err(e)
                    if e.kind() == ErrorKind::ConnectionRefused && attempts < CONNECT_ATTEMPTS =>
                {
                    info!(port = self.port, attempts, "console port not bound yet");
                    tokio::time::sleep(self.retry_interval).await;
                }
                Err(source) => {
                    return Err(ConsoleError::Connect {
                        port: self.port,
                        attempts,
                        source,
                    });
                }
            }
        };

        let mut session = ConsoleSession { stream };
        session.authenticate().await?;
        Ok(session)
    }

    /// Run `commands` in one session and return everything the console said.
    pub async fn run(&self, commands: &[&str]) -> Result<String, ConsoleError> {
        self.connect().await?.finish(commands).await
    }
}

/// Sends one batch of console commands per session.
#[async_trait]
pub trait ConsoleCommands: Send + Sync {
    async fn run(&self, commands: &[&str]) -> Result<String, ConsoleError>;
}

#[async_trait]
impl ConsoleCommands for ConsoleClient {
    async fn run(&self, commands: &[&str]) -> Result<String, ConsoleError> {
        ConsoleClient::run(self, commands).await
    }
}

/// An authenticated console connection.
pub struct ConsoleSession {
    stream: TcpStream,
}

impl ConsoleSession {
    async fn authenticate(&mut self) -> Result<(), ConsoleError> {
        let banner = self.read_until("OK").await?;
        if !banner.contains("OK") {
            return Err(ConsoleError::Handshake(banner));
        }
        if !banner.contains(".emulator_auth_token") {
            return Ok(());
        }

        let path = predicates::auth_token_path(&banner)
            .ok_or_else(|| ConsoleError::Handshake(banner.clone()))?
            .to_path_buf();
        let token = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ConsoleError::Token {
                path: path.clone(),
                source,
            })?;
        self.stream
            .write_all(format!("auth {}\n", token.trim()).as_bytes())
            .await?;
        let reply = self.read_until("OK").await?;
        if !reply.contains("OK") {
            return Err(ConsoleError::Auth(reply));
        }
        debug!("console authenticated");
        Ok(())
    }

    /// Read until `marker` shows up, the peer closes, or a read stalls.
    async fn read_until(&mut self, marker: &str) -> Result<String, ConsoleError> {
        let mut buf = Vec::with_capacity(1024);
        let mut chunk = [0u8; 1024];
        loop {
            if String::from_utf8_lossy(&buf).contains(marker) {
                break;
            }
            match tokio::time::timeout(READ_TIMEOUT, self.stream.read(&mut chunk)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => buf.extend_from_slice(chunk.get(..n).unwrap_or_default()),
                Ok(Err(e)) => return Err(e.into()),
            }
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Send `commands`, one per line, then read until the console hangs up.
    pub async fn finish(mut self, commands: &[&str]) -> Result<String, ConsoleError> {
        for cmd in commands {
            info!(cmd, "console command");
            self.stream.write_all(format!("{cmd}\n").as_bytes()).await?;
        }
        let mut out = String::new();
        tokio::time::timeout(SESSION_TIMEOUT, self.stream.read_to_string(&mut out))
            .await
            .map_err(|_| ConsoleError::Timeout(SESSION_TIMEOUT))??;
        Ok(out)
    }
}
