use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};

use crate::errors::RuntimeError;

use super::{ConnectFuture, Connector, TransportConfig, TransportLink};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StdioProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl StdioProcessSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        }
    }
}

/// Spawns a runtime bridge process and speaks one JSON frame per line over
/// its stdin/stdout. Every `connect` spawns a new child.
#[derive(Clone, Debug)]
pub struct StdioConnector {
    spec: StdioProcessSpec,
    config: TransportConfig,
    terminate_grace: Duration,
}

impl StdioConnector {
    pub fn new(spec: StdioProcessSpec) -> Self {
        Self {
            spec,
            config: TransportConfig::default(),
            terminate_grace: Duration::from_millis(750),
        }
    }

    pub fn with_config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Time a child gets to exit on its own after stdin closes before it is killed.
    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    async fn spawn(&self) -> Result<TransportLink, RuntimeError> {
        self.config.validate()?;

        let mut command = Command::new(&self.spec.program);
        command
            .args(&self.spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        if let Some(cwd) = &self.spec.cwd {
            command.current_dir(cwd);
        }

        for (key, value) in &self.spec.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|err| {
            RuntimeError::ConnectFailed(format!(
                "failed to spawn {}: {err}",
                self.spec.program.display()
            ))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            RuntimeError::ConnectFailed("failed to acquire child stdin pipe".to_owned())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            RuntimeError::ConnectFailed("failed to acquire child stdout pipe".to_owned())
        })?;

        let (write_tx, write_rx) = mpsc::channel(self.config.write_channel_capacity);
        let (read_tx, read_rx) = mpsc::channel(self.config.read_channel_capacity);
        let (stdin_closed_tx, stdin_closed_rx) = oneshot::channel();

        tokio::spawn(reader_loop(stdout, read_tx));
        tokio::spawn(async move {
            if let Err(err) = writer_loop(write_rx, stdin).await {
                tracing::warn!(error = %err, "stdio writer failed");
            }
            let _ = stdin_closed_tx.send(());
        });
        tokio::spawn(reap_child(child, stdin_closed_rx, self.terminate_grace));

        Ok(TransportLink { write_tx, read_rx })
    }
}

impl Connector for StdioConnector {
    fn connect<'a>(&'a self) -> ConnectFuture<'a> {
        Box::pin(self.spawn())
    }

    fn endpoint(&self) -> String {
        format!("stdio:{}", self.spec.program.display())
    }
}

/// Reader loop: one line -> one frame.
/// Allocation: one reusable String buffer per task plus one Vec per frame.
async fn reader_loop(stdout: ChildStdout, inbound_tx: mpsc::Sender<Vec<u8>>) {
    let mut reader = BufReader::new(stdout);
    let mut line = String::with_capacity(4096);

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "stdio reader failed");
                break;
            }
        }

        let raw = line.trim_end_matches(['\n', '\r']);
        if raw.is_empty() {
            continue;
        }
        if inbound_tx.send(raw.as_bytes().to_vec()).await.is_err() {
            break;
        }
    }
}

/// Writer loop: single write path into child stdin, newline terminated.
async fn writer_loop(
    mut outbound_rx: mpsc::Receiver<Vec<u8>>,
    mut stdin: ChildStdin,
) -> std::io::Result<()> {
    while let Some(mut frame) = outbound_rx.recv().await {
        frame.push(b'\n');
        if let Err(err) = stdin.write_all(&frame).await {
            if err.kind() == std::io::ErrorKind::BrokenPipe {
                return Ok(());
            }
            return Err(err);
        }
    }

    if let Err(err) = stdin.flush().await {
        if err.kind() == std::io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

/// Wait for the child. Once stdin is closed it gets `grace` to exit, then it is killed.
async fn reap_child(mut child: Child, stdin_closed: oneshot::Receiver<()>, grace: Duration) {
    tokio::select! {
        status = child.wait() => {
            tracing::debug!(status = ?status, "stdio child exited");
            return;
        }
        _ = stdin_closed => {}
    }

    match timeout(grace, child.wait()).await {
        Ok(status) => tracing::debug!(status = ?status, "stdio child exited after stdin closed"),
        Err(_) => {
            if let Err(err) = child.kill().await {
                tracing::warn!(error = %err, "failed to kill stdio child");
            }
        }
    }
}
