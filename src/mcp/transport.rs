//! MCP Transport Layer
//!
//! Line-delimited JSON over a child process's standard streams.
//!
//! # Architecture
//!
//! The transport is split into a [`LineReader`] and a [`LineWriter`] so the
//! client can give the read half to one dedicated reader task while many
//! callers share the write half. The child process itself is held by
//! [`ServerProcess`], which kills it on drop.
//!
//! Protocol concerns (JSON-RPC shapes, id correlation) live in the protocol
//! and client layers.

use serde::Serialize;
use std::collections::HashMap;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn MCP server '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("MCP server stdio unavailable: {0}")]
    MissingPipe(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Write half: one JSON object per line, flushed immediately.
pub struct LineWriter {
    inner: Box<dyn AsyncWrite + Send + Unpin>,
}

impl LineWriter {
    pub fn new(inner: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }

    /// Serialize `message` and write it as a single line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the pipe is closed.
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), TransportError> {
        let mut json = serde_json::to_string(message)?;
        debug!(message = %json, "sending to MCP server");
        json.push('\n');
        self.inner.write_all(json.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

/// Read half: yields one line at a time, skipping blank lines.
pub struct LineReader {
    inner: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    /// Reusable buffer for reading lines
    line_buffer: String,
}

impl LineReader {
    pub fn new(inner: impl AsyncRead + Send + Unpin + 'static) -> Self {
        let boxed: Box<dyn AsyncRead + Send + Unpin> = Box::new(inner);
        Self {
            inner: BufReader::new(boxed),
            line_buffer: String::with_capacity(4096),
        }
    }

    /// Next non-empty line, or `None` at EOF.
    ///
    /// # Errors
    ///
    /// Returns an error on read failure or invalid UTF-8.
    pub async fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            self.line_buffer.clear();
            let bytes_read = self.inner.read_line(&mut self.line_buffer).await?;
            if bytes_read == 0 {
                return Ok(None);
            }
            let line = self.line_buffer.trim();
            if line.is_empty() {
                continue;
            }
            debug!(message = %line, "received from MCP server");
            return Ok(Some(line.to_string()));
        }
    }
}

/// Handle to a spawned MCP server process.
pub struct ServerProcess {
    child: Child,
    command: String,
}

impl ServerProcess {
    /// Server command line (for diagnostics)
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Send SIGKILL without waiting.
    pub fn start_kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(command = %self.command, error = %e, "kill on exited MCP server");
        }
    }

    /// Kill the process and wait for it to exit.
    pub async fn kill(&mut self) -> Result<(), TransportError> {
        info!(command = %self.command, "killing MCP server");
        self.child.kill().await?;
        Ok(())
    }

    /// Whether the process has already exited.
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        // Can't await in Drop, so just start the kill
        let _ = self.child.start_kill();
    }
}

/// stdio transport for local MCP servers
///
/// # Example
///
/// ```ignore
/// let transport = StdioTransport::spawn("k8s", "npx", &["-y".into(), "mcp-server-kubernetes".into()], &HashMap::new())?;
/// let (reader, writer, process) = transport.into_parts();
/// ```
pub struct StdioTransport {
    reader: LineReader,
    writer: LineWriter,
    process: Option<ServerProcess>,
}

impl StdioTransport {
    /// Spawn an MCP server as a child process.
    ///
    /// # Arguments
    ///
    /// * `server` - Configured server name (for logs)
    /// * `command` - Program to run
    /// * `args` - Arguments to pass to the command
    /// * `env` - Extra environment variables for the child
    ///
    /// The child's stderr is forwarded line by line to `warn!` tagged with
    /// the server name.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Spawn`] if the process cannot be started.
    pub fn spawn(
        server: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, TransportError> {
        let command_line = if args.is_empty() {
            command.to_string()
        } else {
            format!("{} {}", command, args.join(" "))
        };
        info!(server, command = %command_line, "spawning MCP server");

        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                command: command_line.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(TransportError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(TransportError::MissingPipe("stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            let server = server.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(server = %server, "{}", line);
                }
            });
        }

        Ok(Self {
            reader: LineReader::new(stdout),
            writer: LineWriter::new(stdin),
            process: Some(ServerProcess {
                child,
                command: command_line,
            }),
        })
    }

    /// Build a transport over arbitrary streams (no child process).
    pub fn from_io(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: LineReader::new(reader),
            writer: LineWriter::new(writer),
            process: None,
        }
    }

    pub fn into_parts(self) -> (LineReader, LineWriter, Option<ServerProcess>) {
        (self.reader, self.writer, self.process)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::McpRequest;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_writer_emits_one_line_per_message() {
        let (client, mut server) = duplex(1024);
        let mut writer = LineWriter::new(client);
        writer.send(&McpRequest::new(1, "tools/list", None)).await.unwrap();
        writer.send(&McpRequest::new(2, "tools/list", None)).await.unwrap();
        drop(writer);

        let mut out = String::new();
        server.read_to_string(&mut out).await.unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"id\":1"));
        assert!(lines[1].contains("\"id\":2"));
    }

    #[tokio::test]
    async fn test_reader_skips_blank_lines_and_detects_eof() {
        let (mut server, client) = duplex(1024);
        let mut reader = LineReader::new(client);
        server.write_all(b"\n  \n{\"a\":1}\r\n").await.unwrap();
        drop(server);

        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let result = StdioTransport::spawn(
            "missing",
            "/nonexistent/kubeguard-mcp-server",
            &[],
            &HashMap::new(),
        );
        match result {
            Err(TransportError::Spawn { command, .. }) => {
                assert!(command.contains("kubeguard-mcp-server"))
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_echo_process_round_trip() {
        // `cat` echoes our own line back
        let transport = StdioTransport::spawn("cat", "cat", &[], &HashMap::new()).unwrap();
        let (mut reader, mut writer, process) = transport.into_parts();
        assert!(process.is_some());

        writer.send(&McpRequest::new(9, "ping", None)).await.unwrap();
        let line = reader.next_line().await.unwrap().unwrap();
        assert!(line.contains("\"id\":9"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_passes_env() {
        let mut env = HashMap::new();
        env.insert("KUBEGUARD_TEST_VALUE".to_string(), "from-env".to_string());
        let transport = StdioTransport::spawn(
            "env",
            "sh",
            &["-c".to_string(), "echo $KUBEGUARD_TEST_VALUE".to_string()],
            &env,
        )
        .unwrap();
        let (mut reader, _writer, _process) = transport.into_parts();
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("from-env"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_closes_stdout() {
        let transport = StdioTransport::spawn("cat", "cat", &[], &HashMap::new()).unwrap();
        let (mut reader, _writer, process) = transport.into_parts();
        let mut process = process.unwrap();
        process.kill().await.unwrap();
        assert!(process.has_exited());
        assert_eq!(reader.next_line().await.unwrap(), None);
    }
}
