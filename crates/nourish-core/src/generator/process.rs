//! Generator backed by a command-line model client.
//!
//! The rendered prompt is written to the child's stdin and the answer is
//! read from stdout. Any client that prints a JSON object (bare, fenced or
//! inside prose) works, e.g. `claude -p` or `llm`.

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use super::json::extract_object;
use super::{GenerationError, GenerationRequest, Generator};

/// Runs `program args...` once per request.
#[derive(Debug, Clone)]
pub struct ProcessGenerator {
    program: String,
    args: Vec<String>,
}

impl ProcessGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

/// Spawn `program`, feed `input` on stdin, and collect stdout. A non-zero
/// exit is a provider error carrying the tail of stderr. The child is killed
/// if the returned future is dropped.
pub(crate) async fn run_client(
    program: &str,
    args: &[String],
    input: &[u8],
) -> Result<String, GenerationError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            GenerationError::ProviderError(format!(
                "failed to spawn {program:?}: {e} -- is it installed and on PATH?"
            ))
        })?;

    let mut stdin = child.stdin.take();
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let write_input = async {
        if let Some(ref mut pipe) = stdin {
            // A client that ignores stdin may close it early.
            let _ = pipe.write_all(input).await;
            let _ = pipe.shutdown().await;
        }
        drop(stdin);
    };
    let read_stdout = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stdout_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };
    let read_stderr = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stderr_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };

    let ((), stdout, stderr, status) =
        tokio::join!(write_input, read_stdout, read_stderr, child.wait());
    let status = status
        .map_err(|e| {
            GenerationError::ProviderError(format!("failed to wait on {program:?}: {e}"))
        })?;

    if !status.success() {
        let tail: String = stderr
            .chars()
            .rev()
            .take(512)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        return Err(GenerationError::ProviderError(format!(
            "{program:?} exited with {status}: {}",
            tail.trim()
        )));
    }
    Ok(stdout)
}

#[async_trait]
impl Generator for ProcessGenerator {
    fn name(&self) -> &str {
        &self.program
    }

    async fn invoke(&self, request: &GenerationRequest) -> Result<Value, GenerationError> {
        let prompt = request.render_prompt();
        debug!(
            program = %self.program,
            task = %request.task,
            attempt = request.attempt,
            prompt_len = prompt.len(),
            "invoking generator"
        );
        let stdout = run_client(&self.program, &self.args, prompt.as_bytes()).await?;
        extract_object(&stdout).ok_or_else(|| {
            GenerationError::schema(request.schema.name, "no JSON object in generator output")
        })
    }
}
