use std::time::Duration;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpStream,
};

use alarmclock_common::PlaybackConfig;

/// MPD client for the radio-stream side effects. Each start/stop opens
/// a fresh connection, issues its commands, and closes; there is no
/// persistent session to keep alive.
#[derive(Clone)]
pub struct PlaybackClient {
    config: PlaybackConfig,
}

impl PlaybackClient {
    pub fn new(config: PlaybackConfig) -> Self {
        Self { config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Replaces the queue with the configured stream and starts it.
    pub async fn start_stream(&self) -> anyhow::Result<()> {
        let mut conn = MpdConnection::open(&self.config).await?;
        conn.command("clear").await?;
        conn.command(&format!("add \"{}\"", self.config.stream_url))
            .await?;
        conn.command("play").await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        let mut conn = MpdConnection::open(&self.config).await?;
        conn.command("stop").await?;
        Ok(())
    }
}

struct MpdConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl MpdConnection {
    async fn open(config: &PlaybackConfig) -> anyhow::Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let stream = tokio::time::timeout(
            Duration::from_millis(config.connect_timeout_ms),
            TcpStream::connect(&addr),
        )
        .await
        .with_context(|| format!("timed out connecting to mpd at {addr}"))?
        .with_context(|| format!("failed to connect to mpd at {addr}"))?;

        let (reader, writer) = stream.into_split();
        let mut conn = Self {
            reader: BufReader::new(reader),
            writer,
        };

        let greeting = conn.read_line().await?;
        if !greeting.starts_with("OK MPD") {
            bail!("unexpected mpd greeting: {greeting:?}");
        }
        Ok(conn)
    }

    /// Sends one command and drains the response until the terminating
    /// `OK`, failing on an `ACK` error line.
    async fn command(&mut self, command: &str) -> anyhow::Result<()> {
        self.writer
            .write_all(format!("{command}\n").as_bytes())
            .await
            .with_context(|| format!("failed to send mpd command '{command}'"))?;

        loop {
            let line = self.read_line().await?;
            if line == "OK" {
                return Ok(());
            }
            if line.starts_with("ACK") {
                bail!("mpd rejected '{command}': {line}");
            }
        }
    }

    async fn read_line(&mut self) -> anyhow::Result<String> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .await
            .context("failed to read mpd response")?;
        if read == 0 {
            bail!("mpd closed the connection");
        }
        Ok(line.trim_end().to_string())
    }
}
