//! CLI subprocess adapter with an activity-based timeout.
//!
//! The timeout deadline resets on every stdout/stderr chunk, so a model
//! that streams slowly but steadily is never killed, while one that goes
//! silent is. Fixed wall-clock timeouts would kill reasoning models that
//! think for minutes before emitting their first token.

use super::error::{AdapterError, Result};
use super::{ModelAdapter, compose_prompt};
use crate::config::CliAdapterConfig;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;

const MODEL_PLACEHOLDER: &str = "{model}";
const PROMPT_PLACEHOLDER: &str = "{prompt}";
const STDERR_TAIL_CHARS: usize = 2000;

enum Chunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

/// Adapter that shells out to a local CLI tool (claude, codex, gemini, ...).
pub struct CliAdapter {
    name: String,
    command: String,
    args: Vec<String>,
    activity_timeout: Duration,
}

impl CliAdapter {
    pub fn new(name: &str, config: &CliAdapterConfig) -> Self {
        Self {
            name: name.to_string(),
            command: config.command.clone(),
            args: config.args.clone(),
            activity_timeout: Duration::from_secs(config.timeout),
        }
    }

    /// Override the activity timeout (used by tests).
    pub fn with_activity_timeout(mut self, timeout: Duration) -> Self {
        self.activity_timeout = timeout;
        self
    }

    /// Substitute placeholders into the configured args. When no arg carries
    /// `{prompt}`, the prompt is piped through stdin instead.
    fn build_args(&self, model: &str, prompt: &str) -> (Vec<String>, bool) {
        let mut prompt_in_args = false;
        let args = self
            .args
            .iter()
            .map(|arg| {
                let mut arg = arg.replace(MODEL_PLACEHOLDER, model);
                if arg.contains(PROMPT_PLACEHOLDER) {
                    prompt_in_args = true;
                    arg = arg.replace(PROMPT_PLACEHOLDER, prompt);
                }
                arg
            })
            .collect();
        (args, !prompt_in_args)
    }
}

#[async_trait]
impl ModelAdapter for CliAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn adapter_type(&self) -> &'static str {
        "cli"
    }

    async fn invoke(
        &self,
        prompt: &str,
        model: &str,
        context: Option<&str>,
        _is_deliberation: bool,
    ) -> Result<String> {
        let full_prompt = compose_prompt(prompt, context);
        let (args, prompt_via_stdin) = self.build_args(model, &full_prompt);

        let mut command = Command::new(&self.command);
        command
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command.stdin(if prompt_via_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command.spawn().map_err(|e| {
            AdapterError::Invocation(format!("failed to spawn '{}': {e}", self.command))
        })?;

        if prompt_via_stdin {
            let mut stdin = child.stdin.take().ok_or_else(|| {
                AdapterError::Invocation("child stdin unavailable".to_string())
            })?;
            stdin
                .write_all(full_prompt.as_bytes())
                .await
                .map_err(|e| AdapterError::Invocation(format!("failed to write stdin: {e}")))?;
            drop(stdin);
        }

        let stdout = child.stdout.take().ok_or_else(|| {
            AdapterError::Invocation("child stdout unavailable".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            AdapterError::Invocation("child stderr unavailable".to_string())
        })?;

        // Both streams feed one channel; any chunk counts as activity.
        let (tx, mut rx) = mpsc::channel::<Chunk>(64);
        let err_tx = tx.clone();
        tokio::spawn(pump(stdout, tx, Chunk::Stdout));
        tokio::spawn(pump(stderr, err_tx, Chunk::Stderr));

        let mut stdout_buf: Vec<u8> = Vec::new();
        let mut stderr_buf: Vec<u8> = Vec::new();

        loop {
            match tokio::time::timeout(self.activity_timeout, rx.recv()).await {
                Ok(Some(Chunk::Stdout(bytes))) => stdout_buf.extend_from_slice(&bytes),
                Ok(Some(Chunk::Stderr(bytes))) => stderr_buf.extend_from_slice(&bytes),
                // Both readers finished; the process is done (or closing)
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "Adapter '{}': no output for {:?}, killing subprocess",
                        self.name,
                        self.activity_timeout
                    );
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Err(AdapterError::Timeout {
                        seconds: self.activity_timeout.as_secs(),
                    });
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| AdapterError::Invocation(format!("failed to reap child: {e}")))?;

        if !status.success() {
            let stderr_text = String::from_utf8_lossy(&stderr_buf);
            return Err(AdapterError::Invocation(format!(
                "'{}' exited with {}: {}",
                self.command,
                status,
                tail(&stderr_text, STDERR_TAIL_CHARS)
            )));
        }

        Ok(String::from_utf8_lossy(&stdout_buf).trim().to_string())
    }
}

async fn pump<R>(mut reader: R, tx: mpsc::Sender<Chunk>, wrap: fn(Vec<u8>) -> Chunk)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(wrap(buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn tail(text: &str, max_chars: usize) -> &str {
    let len = text.chars().count();
    if len <= max_chars {
        return text.trim();
    }
    let skip = len - max_chars;
    let byte_start = text
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[byte_start..].trim()
}
