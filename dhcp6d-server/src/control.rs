//! The local control channel
//!
//! A Unix domain socket speaking a line protocol: one UTF-8 command per
//! line, answered with `OK <text>`, `ERR <text>`, or a multi-line block
//! closed by a line holding a single dot.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use dhcp6d_core::{Error, Result};

use crate::stats::StatsRegistry;

/// Commands the control channel forwards to the master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Shutdown,
    Reload,
}

const HELP_TEXT: &str = "\
help       show this text\n\
shutdown   stop the server\n\
reload     reload the configuration\n\
stats      show counters\n\
stats-json show counters as JSON";

pub struct ControlServer {
    path: PathBuf,
    listener: UnixListener,
    commands: mpsc::Sender<ControlCommand>,
    stats: Arc<StatsRegistry>,
}

impl ControlServer {
    /// Bind the control socket, replacing a stale one if needed
    pub fn bind(
        path: &Path,
        commands: mpsc::Sender<ControlCommand>,
        stats: Arc<StatsRegistry>,
    ) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)
            .map_err(|e| Error::config(format!("control socket {}: {}", path.display(), e)))?;
        info!(path = %path.display(), "control socket ready");
        Ok(Self {
            path: path.to_path_buf(),
            listener,
            commands,
            stats,
        })
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((stream, _)) => {
                        let commands = self.commands.clone();
                        let stats = self.stats.clone();
                        tokio::spawn(async move {
                            if let Err(error) = handle_connection(stream, commands, stats).await {
                                debug!(%error, "control connection ended");
                            }
                        });
                    }
                    Err(error) => {
                        error!(%error, "control socket accept failed");
                    }
                }
            }
        })
    }

    /// The socket path, for cleanup at shutdown
    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn handle_connection(
    stream: UnixStream,
    commands: mpsc::Sender<ControlCommand>,
    stats: Arc<StatsRegistry>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let command = line.trim().to_lowercase();
        if command.is_empty() {
            continue;
        }
        debug!(command = %command, "control command");

        match command.as_str() {
            "help" => {
                writer.write_all(HELP_TEXT.as_bytes()).await?;
                writer.write_all(b"\n.\n").await?;
            }
            "shutdown" => {
                let sent = commands.send(ControlCommand::Shutdown).await.is_ok();
                if sent {
                    writer.write_all(b"OK shutting down\n").await?;
                } else {
                    writer.write_all(b"ERR server is not listening\n").await?;
                }
            }
            "reload" => {
                let sent = commands.send(ControlCommand::Reload).await.is_ok();
                if sent {
                    writer.write_all(b"OK reloading configuration\n").await?;
                } else {
                    writer.write_all(b"ERR server is not listening\n").await?;
                }
            }
            "stats" => {
                let snapshot = stats.snapshot();
                writer.write_all(snapshot.render_text().as_bytes()).await?;
                writer.write_all(b".\n").await?;
            }
            "stats-json" => {
                let snapshot = stats.snapshot();
                match serde_json::to_string(&snapshot) {
                    Ok(json) => {
                        writer.write_all(json.as_bytes()).await?;
                        writer.write_all(b"\n.\n").await?;
                    }
                    Err(error) => {
                        writer
                            .write_all(format!("ERR {}\n", error).as_bytes())
                            .await?;
                    }
                }
            }
            other => {
                writer
                    .write_all(format!("ERR unknown command '{}'\n", other).as_bytes())
                    .await?;
            }
        }
        writer.flush().await?;
    }

    Ok(())
}
