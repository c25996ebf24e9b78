//! Persistent, PTY-backed shell sessions.
//!
//! One session backs one conversation: a long-lived shell process with a
//! real pseudo-terminal, so commands share state (`cd`, exported
//! variables, background jobs) the way an interactive terminal would. A
//! pipe-backed shell cannot reproduce prompt-refresh and job-control
//! behavior faithfully, so a real PTY via `portable_pty` is mandatory.
//!
//! Completion detection relies on two markers injected around every
//! command: a prompt marker that brackets the command's output, and an
//! exit-code marker that carries the command's exit status. Both are
//! random per-session strings, vanishingly unlikely to appear in real
//! output.

use crate::error::{ToolError, ToolResult};
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, instrument, warn};

/// Outcome of one completed `exec` call.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: i32,
    pub timed_out: bool,
}

/// A persistent interactive shell session backed by a real PTY.
///
/// `exec` serializes concurrent callers FIFO via `run_lock`: the shell has
/// exactly one foreground job at a time, so a second caller simply waits
/// for the lock rather than racing the first caller's output.
pub struct ShellSession {
    writer: Mutex<Box<dyn Write + Send>>,
    reader_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    child: Mutex<Box<dyn portable_pty::Child + Send + Sync>>,
    run_lock: Mutex<()>,
    prompt_marker: String,
    exit_marker: String,
    alive: AtomicBool,
    pid: Option<u32>,
}

/// Streaming output from a running command, with markers already stripped.
pub enum StreamEvent {
    Chunk(String),
    Exit(CommandResult),
}

impl ShellSession {
    /// Spawn the shell. Does not install the prompt marker yet; call
    /// `start()` before the first `exec`.
    #[instrument(skip_all, fields(shell))]
    pub fn spawn(shell: &str, cwd: &std::path::Path) -> ToolResult<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 40,
                cols: 200,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ToolError::execution_failed(format!("failed to open pty: {e}")))?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.cwd(cwd);
        cmd.env("TERM", "dumb");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.env("NO_COLOR", "1");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ToolError::execution_failed(format!("failed to spawn shell: {e}")))?;
        let pid = child.process_id();
        drop(pair.slave);

        let mut reader = pair.master.try_clone_reader().map_err(|e| {
            ToolError::execution_failed(format!("failed to clone pty reader: {e}"))
        })?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ToolError::execution_failed(format!("failed to take pty writer: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let suffix = random_suffix(12);
        Ok(Self {
            writer: Mutex::new(writer),
            reader_rx: Mutex::new(rx),
            child: Mutex::new(child),
            run_lock: Mutex::new(()),
            prompt_marker: format!("__convoy_prompt_{suffix}__"),
            exit_marker: format!("__convoy_exit_{suffix}__"),
            alive: AtomicBool::new(true),
            pid,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Disable the interactive prompt and drain the shell's startup banner.
    /// Idempotent: calling twice just re-drains whatever accumulated since.
    pub async fn start(&self) -> ToolResult<()> {
        {
            let mut w = self.writer.lock().await;
            writeln!(w, "export PS1='' PS2=''").map_err(io_err)?;
            w.flush().map_err(io_err)?;
        }
        let mut rx = self.reader_rx.lock().await;
        let _ = tokio::time::timeout(Duration::from_millis(150), async {
            while rx.try_recv().is_ok() {}
        })
        .await;
        Ok(())
    }

    /// Run one command to completion, invoking `on_chunk` with sanitized-free
    /// (marker-stripped, otherwise raw) text as it arrives.
    #[instrument(skip_all, fields(pid = self.pid))]
    pub async fn exec<F>(
        &self,
        command: &str,
        timeout: Duration,
        mut on_chunk: F,
    ) -> ToolResult<CommandResult>
    where
        F: FnMut(String) + Send,
    {
        if !self.is_alive() {
            return Err(ToolError::SessionDied);
        }
        let _permit = self.run_lock.lock().await;

        // `<command>; printf the exit-code marker and status; printf the
        // prompt marker` — completion is "prompt marker reappears".
        let wrapped = format!(
            "printf '%s\\n' {pm}; {{ {cmd} ; }}; __convoy_status=$?; printf '%s%d\\n%s\\n' {em} $__convoy_status {pm}\n",
            pm = shell_quote(&self.prompt_marker),
            em = shell_quote(&self.exit_marker),
            cmd = command,
        );

        {
            let mut w = self.writer.lock().await;
            w.write_all(wrapped.as_bytes()).map_err(io_err)?;
            w.flush().map_err(io_err)?;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut acc = String::new();
        let mut carry: Vec<u8> = Vec::new();
        let mut seen_start = false;
        let mut rx = self.reader_rx.lock().await;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                warn!("command timed out");
                return Ok(CommandResult {
                    exit_code: -1,
                    timed_out: true,
                });
            }

            let bytes = match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    self.alive.store(false, Ordering::SeqCst);
                    return Err(ToolError::SessionDied);
                }
                Err(_) => {
                    return Ok(CommandResult {
                        exit_code: -1,
                        timed_out: true,
                    })
                }
            };

            carry.extend_from_slice(&bytes);
            // Decode only up to the last valid UTF-8 boundary; a multi-byte
            // char (or a marker) may straddle two PTY reads.
            let valid_len = valid_utf8_prefix(&carry);
            let text = String::from_utf8_lossy(&carry[..valid_len]).into_owned();
            carry.drain(..valid_len);
            acc.push_str(&text);

            if !seen_start {
                match acc.find(&self.prompt_marker) {
                    Some(pos) => {
                        acc.drain(..pos + self.prompt_marker.len());
                        seen_start = true;
                    }
                    None => continue,
                }
            }

            if let Some(pos) = acc.find(&self.exit_marker) {
                let before = acc[..pos].to_string();
                if !before.is_empty() {
                    on_chunk(before);
                }
                let rest = acc[pos + self.exit_marker.len()..].to_string();
                if let Some(end_pos) = rest.find(&self.prompt_marker) {
                    let code_str = rest[..end_pos].trim();
                    let exit_code = code_str.parse::<i32>().unwrap_or(-1);
                    debug!(exit_code, "command completed");
                    return Ok(CommandResult {
                        exit_code,
                        timed_out: false,
                    });
                }
                // Exit marker landed but the trailing prompt marker hasn't
                // arrived yet; keep the tail (it may still be straddling a
                // read boundary) and wait for more.
                acc = format!("{}{}", self.exit_marker, rest);
                continue;
            }

            // Flush everything that can't possibly still contain a partial
            // marker; markers here are well under this threshold.
            let marker_margin = self.exit_marker.len() + self.prompt_marker.len();
            if acc.len() > 4096 + marker_margin {
                let safe_len = acc.len() - marker_margin;
                let flush: String = acc.drain(..safe_len).collect();
                on_chunk(flush);
            }
        }
    }

    /// Send an interrupt (Ctrl-C equivalent) to the foreground job. Does
    /// not kill the shell itself; the session remains usable afterward.
    pub async fn interrupt(&self) -> ToolResult<()> {
        let mut w = self.writer.lock().await;
        w.write_all(&[0x03]).map_err(io_err)?;
        w.flush().map_err(io_err)
    }

    /// Terminate the shell process. The session is no longer usable.
    pub async fn stop(&self) -> ToolResult<()> {
        let mut child = self.child.lock().await;
        let res = child
            .kill()
            .map_err(|e| ToolError::execution_failed(format!("failed to kill shell: {e}")));
        self.alive.store(false, Ordering::SeqCst);
        res
    }
}

fn io_err(e: std::io::Error) -> ToolError {
    ToolError::execution_failed(format!("pty io error: {e}"))
}

fn valid_utf8_prefix(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Ok(_) => bytes.len(),
        Err(e) => e.valid_up_to(),
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
