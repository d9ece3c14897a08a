//! TerminalManager - runs agent-requested commands scoped to a workspace root.
//!
//! Backs the `terminal/*` capabilities. Each command gets a terminal id;
//! stdout and stderr are interleaved into one output buffer that keeps the
//! most recent `output_byte_limit` bytes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, watch, Mutex};
use uuid::Uuid;

use crate::api::types::{
    ApiError, CreateTerminalRequest, TerminalExitStatus, TerminalId, TerminalOutput,
};
use crate::protocols::host::TerminalProvider;
use crate::runtime::path::{canonicalize_workspace_root, resolve_path_in_workspace};

const OUTPUT_BUFFER_SIZE: usize = 4096;
pub const DEFAULT_OUTPUT_BYTE_LIMIT: usize = 1024 * 1024;
/// How long to keep draining pipes after the process exits
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured output, trimmed from the front once it exceeds the limit.
struct OutputBuffer {
    text: String,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        if self.text.len() <= self.limit {
            return;
        }

        let mut cut = self.text.len() - self.limit;
        while !self.text.is_char_boundary(cut) {
            cut += 1;
        }
        self.text.drain(..cut);
        self.truncated = true;
    }
}

struct Terminal {
    output: Arc<Mutex<OutputBuffer>>,
    exit_rx: watch::Receiver<Option<TerminalExitStatus>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl Terminal {
    fn exit_status(&self) -> Option<TerminalExitStatus> {
        self.exit_rx.borrow().clone()
    }

    async fn kill(&self) {
        if let Some(kill_tx) = self.kill_tx.lock().await.take() {
            let _ = kill_tx.send(());
        }
    }
}

/// Per-workspace terminal registry.
pub struct TerminalManager {
    workspace_root: PathBuf,
    terminals: Mutex<HashMap<TerminalId, Arc<Terminal>>>,
}

impl TerminalManager {
    /// Create a new TerminalManager scoped to an existing workspace directory.
    pub fn new(workspace_root: &Path) -> Result<Self, ApiError> {
        Ok(Self {
            workspace_root: canonicalize_workspace_root(workspace_root)?,
            terminals: Mutex::new(HashMap::new()),
        })
    }

    pub async fn terminal_count(&self) -> usize {
        self.terminals.lock().await.len()
    }

    async fn get(&self, terminal_id: &str) -> Result<Arc<Terminal>, ApiError> {
        self.terminals
            .lock()
            .await
            .get(terminal_id)
            .cloned()
            .ok_or_else(|| ApiError::TerminalNotFound {
                terminal_id: terminal_id.to_string(),
            })
    }

    fn build_command(&self, request: &CreateTerminalRequest) -> Result<Command, ApiError> {
        let cwd = match &request.cwd {
            Some(cwd) => {
                let resolved = resolve_path_in_workspace(&self.workspace_root, cwd)?;
                if !resolved.is_dir() {
                    return Err(ApiError::PathNotDirectory { path: cwd.clone() });
                }
                resolved
            }
            None => self.workspace_root.clone(),
        };

        // A bare command string goes through the shell; command + args runs directly
        let mut cmd = if request.args.is_empty() {
            build_shell_command(&request.command)
        } else {
            let mut cmd = Command::new(&request.command);
            cmd.args(&request.args);
            cmd
        };

        cmd.current_dir(cwd)
            .envs(request.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl TerminalProvider for TerminalManager {
    async fn create(&self, request: CreateTerminalRequest) -> Result<TerminalId, ApiError> {
        if request.command.trim().is_empty() {
            return Err(ApiError::invalid("Command cannot be empty"));
        }

        let terminal_id = Uuid::new_v4().to_string();
        log::info!(
            "Spawning terminal command: terminal_id={terminal_id}, cwd={:?}",
            request.cwd
        );
        log::debug!(
            "Terminal command received: terminal_id={terminal_id}, len={}, args={}",
            request.command.len(),
            request.args.len()
        );

        let mut child = self
            .build_command(&request)?
            .spawn()
            .map_err(|e| ApiError::io("Failed to spawn terminal command", e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ApiError::io("Failed to capture stdout", "no pipe"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ApiError::io("Failed to capture stderr", "no pipe"))?;

        let limit = request.output_byte_limit.unwrap_or(DEFAULT_OUTPUT_BYTE_LIMIT);
        let output = Arc::new(Mutex::new(OutputBuffer::new(limit)));
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

        let readers = [
            tokio::spawn(stream_to_buffer(stdout, output.clone(), "stdout")),
            tokio::spawn(stream_to_buffer(stderr, output.clone(), "stderr")),
        ];

        let id = terminal_id.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = &mut kill_rx => {
                    log::debug!("Killing terminal: terminal_id={id}");
                    if let Err(e) = child.start_kill() {
                        log::warn!("Failed to kill terminal process: {e}");
                    }
                    child.wait().await
                }
            };

            let exit_status = match status {
                Ok(status) => to_exit_status(status),
                Err(e) => {
                    log::warn!("Terminal process wait failed: {e}");
                    TerminalExitStatus {
                        exit_code: None,
                        signal: None,
                    }
                }
            };

            // Give the pipes a moment so the final output is captured before exit is visible
            for reader in readers {
                let _ = tokio::time::timeout(OUTPUT_DRAIN_GRACE, reader).await;
            }

            log::info!("Terminal exited: terminal_id={id}, status={exit_status:?}");
            let _ = exit_tx.send(Some(exit_status));
        });

        self.terminals.lock().await.insert(
            terminal_id.clone(),
            Arc::new(Terminal {
                output,
                exit_rx,
                kill_tx: Mutex::new(Some(kill_tx)),
            }),
        );

        Ok(terminal_id)
    }

    async fn output(&self, terminal_id: &str) -> Result<TerminalOutput, ApiError> {
        let terminal = self.get(terminal_id).await?;
        let exit_status = terminal.exit_status();
        let output = terminal.output.lock().await;
        Ok(TerminalOutput {
            output: output.text.clone(),
            truncated: output.truncated,
            exit_status,
        })
    }

    async fn wait_for_exit(&self, terminal_id: &str) -> Result<TerminalExitStatus, ApiError> {
        let terminal = self.get(terminal_id).await?;
        let mut exit_rx = terminal.exit_rx.clone();
        let status = exit_rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ApiError::io("Terminal watcher stopped", terminal_id))?;
        Ok(status.clone().unwrap_or(TerminalExitStatus {
            exit_code: None,
            signal: None,
        }))
    }

    async fn kill(&self, terminal_id: &str) -> Result<(), ApiError> {
        self.get(terminal_id).await?.kill().await;
        Ok(())
    }

    async fn release(&self, terminal_id: &str) -> Result<(), ApiError> {
        let terminal = self
            .terminals
            .lock()
            .await
            .remove(terminal_id)
            .ok_or_else(|| ApiError::TerminalNotFound {
                terminal_id: terminal_id.to_string(),
            })?;
        terminal.kill().await;
        log::debug!("Terminal released: terminal_id={terminal_id}");
        Ok(())
    }
}

#[cfg(target_os = "windows")]
fn build_shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(not(target_os = "windows"))]
fn build_shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(unix)]
fn to_exit_status(status: ExitStatus) -> TerminalExitStatus {
    use std::os::unix::process::ExitStatusExt;

    let signal = status.signal().map(|signal| match signal {
        1 => "SIGHUP".to_string(),
        2 => "SIGINT".to_string(),
        9 => "SIGKILL".to_string(),
        15 => "SIGTERM".to_string(),
        other => format!("SIG{other}"),
    });
    TerminalExitStatus {
        exit_code: status.code(),
        signal,
    }
}

#[cfg(not(unix))]
fn to_exit_status(status: ExitStatus) -> TerminalExitStatus {
    TerminalExitStatus {
        exit_code: status.code(),
        signal: None,
    }
}

async fn stream_to_buffer<R: AsyncRead + Unpin>(
    reader: R,
    output: Arc<Mutex<OutputBuffer>>,
    label: &'static str,
) {
    let mut reader = BufReader::new(reader);
    let mut buf = vec![0u8; OUTPUT_BUFFER_SIZE];
    let mut decoder = Utf8StreamDecoder::default();

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = decoder.decode(&buf[..n]);
                if !chunk.is_empty() {
                    output.lock().await.push(&chunk);
                }
            }
            Err(e) => {
                log::warn!("Terminal {label} stream read failed: {e}");
                break;
            }
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        output.lock().await.push(&rest);
    }
}

/// Decodes UTF-8 from arbitrary read chunks.
///
/// An incomplete sequence at the end of a chunk is held until the next one;
/// invalid bytes become U+FFFD.
#[derive(Default)]
struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + len);
                        }
                        None => {
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }

        text
    }

    /// Flush whatever is left once the stream ends.
    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn manager() -> TerminalManager {
        TerminalManager::new(&std::env::temp_dir()).unwrap()
    }

    fn shell(command: &str) -> CreateTerminalRequest {
        CreateTerminalRequest {
            session_id: None,
            command: command.to_string(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            output_byte_limit: None,
        }
    }

    #[test]
    fn test_output_buffer_keeps_tail() {
        let mut buffer = OutputBuffer::new(4);
        buffer.push("ab");
        assert!(!buffer.truncated);
        buffer.push("cdef");
        assert_eq!(buffer.text, "cdef");
        assert!(buffer.truncated);
    }

    #[test]
    fn test_output_buffer_respects_char_boundaries() {
        let mut buffer = OutputBuffer::new(4);
        buffer.push("aé€");
        // 6 bytes: the cut at byte 2 lands inside "é" and moves forward
        assert_eq!(buffer.text, "€");
    }

    #[test]
    fn test_decoder_joins_char_split_across_reads() {
        let mut decoder = Utf8StreamDecoder::default();
        let bytes = "aé".as_bytes();

        assert_eq!(decoder.decode(&bytes[..2]), "a");
        assert_eq!(decoder.decode(&bytes[2..]), "é");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8StreamDecoder::default();

        assert_eq!(decoder.decode(b"x\xffy\xe2\x82"), "x\u{FFFD}y");
        // Stream ends mid-character
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[cfg(not(target_os = "windows"))]
    #[tokio::test]
    async fn test_create_and_wait_captures_output() {
        let manager = manager();
        let mut request = shell("printf \"$GREETING\"; exit 3");
        request.env = vec![("GREETING".to_string(), "hello".to_string())];

        let terminal_id = manager.create(request).await.unwrap();
        let status = timeout(Duration::from_secs(5), manager.wait_for_exit(&terminal_id))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(status.exit_code, Some(3));
        let output = manager.output(&terminal_id).await.unwrap();
        assert_eq!(output.output, "hello");
        assert!(!output.truncated);
        assert_eq!(output.exit_status, Some(status));
    }

    #[cfg(not(target_os = "windows"))]
    #[tokio::test]
    async fn test_command_with_args_and_byte_limit() {
        let manager = manager();
        let mut request = shell("printf");
        request.args = vec!["0123456789".to_string()];
        request.output_byte_limit = Some(4);

        let terminal_id = manager.create(request).await.unwrap();
        timeout(Duration::from_secs(5), manager.wait_for_exit(&terminal_id))
            .await
            .unwrap()
            .unwrap();

        let output = manager.output(&terminal_id).await.unwrap();
        assert_eq!(output.output, "6789");
        assert!(output.truncated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_multibyte_char_on_read_boundary() {
        let manager = manager();
        let request = shell("head -c 4095 /dev/zero | tr '\\0' a; printf '\\303\\251'");

        let terminal_id = manager.create(request).await.unwrap();
        timeout(Duration::from_secs(5), manager.wait_for_exit(&terminal_id))
            .await
            .unwrap()
            .unwrap();

        let output = manager.output(&terminal_id).await.unwrap();
        assert_eq!(output.output.len(), 4097);
        assert!(output.output.ends_with("aé"));
        assert!(!output.output.contains(char::REPLACEMENT_CHARACTER));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_then_release() {
        let manager = manager();
        let terminal_id = manager.create(shell("exec sleep 30")).await.unwrap();

        assert!(manager.output(&terminal_id).await.unwrap().exit_status.is_none());

        manager.kill(&terminal_id).await.unwrap();
        let status = timeout(Duration::from_secs(5), manager.wait_for_exit(&terminal_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.signal.as_deref(), Some("SIGKILL"));

        manager.release(&terminal_id).await.unwrap();
        assert_eq!(manager.terminal_count().await, 0);
        assert!(matches!(
            manager.output(&terminal_id).await,
            Err(ApiError::TerminalNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_terminal_and_empty_command() {
        let manager = manager();
        assert!(matches!(
            manager.kill("missing").await,
            Err(ApiError::TerminalNotFound { .. })
        ));
        assert!(matches!(
            manager.create(shell("   ")).await,
            Err(ApiError::InvalidInput { .. })
        ));
    }
}
