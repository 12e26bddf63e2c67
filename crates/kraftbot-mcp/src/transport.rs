//! Message transports for MCP servers.
//!
//! A transport moves raw JSON-RPC messages; it knows nothing about request
//! ids or methods. The stdio transport lives here, the HTTP based ones in
//! [`crate::remote`].

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::error::TransportError;

/// A bidirectional message channel to one MCP server.
///
/// Driven through `&mut self` only; a shared transport sits behind the
/// mutex in [`McpConnection`](crate::connection::McpConnection).
#[async_trait]
pub trait Transport: Send {
    /// Send one JSON-RPC message.
    async fn send(&mut self, message: &str) -> Result<(), TransportError>;

    /// Receive the next JSON-RPC message from the server.
    async fn receive(&mut self) -> Result<String, TransportError>;

    /// Close the connection and release its resources.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Whether the transport can still carry messages.
    fn is_connected(&self) -> bool;
}

/// Child-process transport speaking newline-delimited JSON over stdin/stdout.
pub struct StdioTransport {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    connected: bool,
}

impl StdioTransport {
    /// Launch `command` with `args` and wire up its pipes.
    ///
    /// The child is killed if the transport is dropped without being closed.
    pub async fn spawn(command: &str, args: &[String]) -> Result<Self, TransportError> {
        debug!(command = command, args = ?args, "Spawning MCP server process");

        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TransportError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            drain_stderr(command.to_string(), stderr);
        }

        debug!(command = command, pid = ?child.id(), "MCP server process spawned");

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            connected: true,
        })
    }

    /// Process ID of the server, while it is running.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

fn missing_pipe(which: &str) -> TransportError {
    TransportError::SpawnFailed(std::io::Error::other(format!("failed to capture {}", which)))
}

/// Forward the server's stderr to the debug log until it closes.
fn drain_stderr(command: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if !line.trim().is_empty() => {
                    debug!(server = %command, "stderr: {}", line.trim_end());
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => {
                    warn!(server = %command, error = %e, "Failed to read MCP server stderr");
                    break;
                }
            }
        }
    });
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        debug!(message = message, "Sending message to MCP server");

        self.stdin
            .write_all(message.as_bytes())
            .await
            .map_err(TransportError::WriteError)?;
        self.stdin.write_all(b"\n").await.map_err(TransportError::WriteError)?;
        self.stdin.flush().await.map_err(TransportError::WriteError)?;

        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = self
                .stdout
                .read_line(&mut line)
                .await
                .map_err(TransportError::ReadError)?;

            if bytes_read == 0 {
                self.connected = false;
                return Err(TransportError::ConnectionClosed);
            }

            let message = line.trim_end();
            if !message.is_empty() {
                debug!(message = message, "Received message from MCP server");
                return Ok(message.to_string());
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            return Ok(());
        }

        debug!("Closing MCP server transport");
        self.connected = false;

        if let Some(pid) = self.child.id() {
            #[cfg(unix)]
            {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;

                debug!(pid = pid, "Sending SIGTERM to MCP server");
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);

                tokio::select! {
                    _ = self.child.wait() => {
                        debug!(pid = pid, "MCP server exited");
                    }
                    _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {
                        warn!(pid = pid, "MCP server ignored SIGTERM, killing");
                        let _ = self.child.kill().await;
                    }
                }
            }

            #[cfg(not(unix))]
            {
                let _ = pid;
                let _ = self.child.kill().await;
            }
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stdio_transport_echo() {
        // `cat` echoes every line back, which is enough to exercise framing.
        let Ok(mut transport) = StdioTransport::spawn("cat", &[]).await else {
            return;
        };

        assert!(transport.is_connected());
        assert!(transport.pid().is_some());

        transport.send(r#"{"jsonrpc":"2.0","method":"ping"}"#).await.unwrap();
        let echoed = transport.receive().await.unwrap();
        assert_eq!(echoed, r#"{"jsonrpc":"2.0","method":"ping"}"#);

        transport.close().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_io() {
        let Ok(mut transport) = StdioTransport::spawn("cat", &[]).await else {
            return;
        };
        transport.close().await.unwrap();

        assert!(matches!(transport.send("x").await, Err(TransportError::NotConnected)));
        assert!(matches!(transport.receive().await, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let result = StdioTransport::spawn("kraftbot-no-such-mcp-server", &[]).await;
        assert!(matches!(result, Err(TransportError::SpawnFailed(_))));
    }
}
