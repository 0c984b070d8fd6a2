// SPDX-License-Identifier: MIT

//! Worker process lifecycle: spawn, wait (bounded by a timeout), cancel
//! (spec.md §4.2).

use async_trait::async_trait;
use rst_core::JobId;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;

/// Hard wall-clock ceiling on a single worker invocation.
pub const WORKER_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Captured stdout+stderr above this size fails the invocation.
pub const MAX_CAPTURED_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("timeout")]
    Timeout(Duration),
    #[error("worker output exceeded {0} bytes")]
    OutputOverflow(usize),
    #[error("worker exited with a non-zero status: {stderr}")]
    Failed { stderr: String },
    #[error("failed to spawn worker: {0}")]
    Spawn(String),
}

/// Spawns a worker process for a stage and manages its lifecycle. Knows
/// nothing about stages — it only runs `<interpreter> <script> <argv...>`.
#[async_trait]
pub trait WorkerInvoker: Send + Sync {
    /// Run a worker to completion (or timeout), returning its trimmed
    /// stdout on success.
    async fn invoke(
        &self,
        job_id: &JobId,
        script: &str,
        argv: &[String],
    ) -> Result<Vec<u8>, InvokeError>;

    /// Send a graceful termination signal to the worker registered for
    /// `job_id`. A no-op if no worker is currently registered for it.
    async fn cancel(&self, job_id: &JobId);
}

/// Real invoker: spawns `interpreter script argv...` via `tokio::process`.
pub struct ProcessInvoker {
    interpreter: String,
    running: Arc<parking_lot::Mutex<HashMap<JobId, Arc<tokio::sync::Mutex<Child>>>>>,
}

impl ProcessInvoker {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            running: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        }
    }

    fn register(&self, job_id: &JobId, child: Arc<tokio::sync::Mutex<Child>>) {
        self.running.lock().insert(job_id.clone(), child);
    }

    fn deregister(&self, job_id: &JobId) {
        self.running.lock().remove(job_id);
    }
}

#[async_trait]
impl WorkerInvoker for ProcessInvoker {
    async fn invoke(
        &self,
        job_id: &JobId,
        script: &str,
        argv: &[String],
    ) -> Result<Vec<u8>, InvokeError> {
        let mut command = Command::new(&self.interpreter);
        command
            .arg(script)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = command.spawn().map_err(|e| {
            tracing::error!(%job_id, script, "failed to spawn worker");
            InvokeError::Spawn(e.to_string())
        })?;
        let child = Arc::new(tokio::sync::Mutex::new(child));
        self.register(job_id, Arc::clone(&child));

        let result = timeout(WORKER_TIMEOUT, run_to_completion(Arc::clone(&child))).await;
        self.deregister(job_id);

        match result {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(err)) => {
                tracing::warn!(%job_id, script, %err, "worker exited with an error");
                Err(err)
            }
            Err(_) => {
                tracing::warn!(%job_id, script, timeout = ?WORKER_TIMEOUT, "worker timed out, killing");
                let mut guard = child.lock().await;
                let _ = guard.start_kill();
                Err(InvokeError::Timeout(WORKER_TIMEOUT))
            }
        }
    }

    async fn cancel(&self, job_id: &JobId) {
        let child = self.running.lock().get(job_id).cloned();
        if let Some(child) = child {
            let mut guard = child.lock().await;
            let _ = guard.start_kill();
        }
    }
}

async fn run_to_completion(child: Arc<tokio::sync::Mutex<Child>>) -> Result<Vec<u8>, InvokeError> {
    let mut guard = child.lock().await;
    let mut stdout = guard.stdout.take();
    let mut stderr = guard.stderr.take();
    let status = guard.wait();

    let stdout_task = async {
        let mut buf = Vec::new();
        if let Some(s) = stdout.as_mut() {
            read_capped(s, &mut buf).await?;
        }
        Ok::<_, InvokeError>(buf)
    };
    let stderr_task = async {
        let mut buf = Vec::new();
        if let Some(s) = stderr.as_mut() {
            read_capped(s, &mut buf).await?;
        }
        Ok::<_, InvokeError>(buf)
    };

    let (status, stdout_buf, stderr_buf) = tokio::join!(status, stdout_task, stderr_task);
    drop(guard);
    let status = status.map_err(|e| InvokeError::Spawn(e.to_string()))?;
    let stdout_buf = stdout_buf?;
    let stderr_buf = stderr_buf?;

    if !status.success() {
        let stderr = String::from_utf8_lossy(&stderr_buf).trim().to_string();
        let message = if stderr.is_empty() {
            format!("exited with status {status}")
        } else {
            stderr
        };
        return Err(InvokeError::Failed { stderr: message });
    }

    let trimmed = std::str::from_utf8(&stdout_buf)
        .map(|s| s.trim().as_bytes().to_vec())
        .unwrap_or(stdout_buf);
    Ok(trimmed)
}

async fn read_capped<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> Result<(), InvokeError> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|e| InvokeError::Spawn(e.to_string()))?;
        if n == 0 {
            return Ok(());
        }
        if buf.len() + n > MAX_CAPTURED_BYTES {
            return Err(InvokeError::OutputOverflow(MAX_CAPTURED_BYTES));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use std::collections::VecDeque;

    /// A scripted response for one `invoke` call.
    #[derive(Debug, Clone)]
    pub enum Scripted {
        Success(Vec<u8>),
        Failure(String),
        Timeout,
    }

    /// One recorded invocation, for assertions.
    #[derive(Debug, Clone)]
    pub struct Recorded {
        pub job_id: JobId,
        pub script: String,
        pub argv: Vec<String>,
    }

    /// Test double: returns pre-scripted responses (FIFO per script name,
    /// falling back to a success with empty output), and records every
    /// call + every `cancel`.
    #[derive(Default)]
    pub struct FakeInvoker {
        scripts: parking_lot::Mutex<HashMap<String, VecDeque<Scripted>>>,
        calls: parking_lot::Mutex<Vec<Recorded>>,
        cancelled: parking_lot::Mutex<Vec<JobId>>,
    }

    impl FakeInvoker {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a response for the next `invoke` call targeting `script`.
        pub fn push_response(&self, script: impl Into<String>, response: Scripted) {
            self.scripts
                .lock()
                .entry(script.into())
                .or_default()
                .push_back(response);
        }

        pub fn calls(&self) -> Vec<Recorded> {
            self.calls.lock().clone()
        }

        pub fn was_cancelled(&self, job_id: &JobId) -> bool {
            self.cancelled.lock().contains(job_id)
        }
    }

    #[async_trait]
    impl WorkerInvoker for FakeInvoker {
        async fn invoke(
            &self,
            job_id: &JobId,
            script: &str,
            argv: &[String],
        ) -> Result<Vec<u8>, InvokeError> {
            self.calls.lock().push(Recorded {
                job_id: job_id.clone(),
                script: script.to_string(),
                argv: argv.to_vec(),
            });

            let next = self
                .scripts
                .lock()
                .get_mut(script)
                .and_then(|q| q.pop_front());

            match next.unwrap_or(Scripted::Success(Vec::new())) {
                Scripted::Success(bytes) => Ok(bytes),
                Scripted::Failure(stderr) => Err(InvokeError::Failed { stderr }),
                Scripted::Timeout => Err(InvokeError::Timeout(WORKER_TIMEOUT)),
            }
        }

        async fn cancel(&self, job_id: &JobId) {
            self.cancelled.lock().push(job_id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn process_invoker_captures_stdout_on_success() {
        let invoker = ProcessInvoker::new("python3");
        let job_id = JobId::new("job-1");
        let result = invoker
            .invoke(
                &job_id,
                "-c",
                &["import sys; sys.stdout.write('hello  ')".to_string()],
            )
            .await;
        assert_eq!(result.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn process_invoker_surfaces_stderr_on_nonzero_exit() {
        let invoker = ProcessInvoker::new("python3");
        let job_id = JobId::new("job-2");
        let err = invoker
            .invoke(
                &job_id,
                "-c",
                &["import sys; sys.stderr.write('boom'); sys.exit(1)".to_string()],
            )
            .await
            .unwrap_err();
        match err {
            InvokeError::Failed { stderr } => assert_eq!(stderr, "boom"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_is_a_noop_for_unregistered_job() {
        let invoker = ProcessInvoker::new("python3");
        invoker.cancel(&JobId::new("ghost")).await;
    }

    #[tokio::test]
    async fn fake_invoker_replays_scripted_responses_in_order() {
        let fake = fake::FakeInvoker::new();
        fake.push_response("crop.py", fake::Scripted::Failure("nope".to_string()));
        fake.push_response("crop.py", fake::Scripted::Success(b"ok".to_vec()));
        let job_id = JobId::new("job-3");

        let first = fake.invoke(&job_id, "crop.py", &[]).await;
        assert!(first.is_err());
        let second = fake.invoke(&job_id, "crop.py", &[]).await;
        assert_eq!(second.unwrap(), b"ok");
        assert_eq!(fake.calls().len(), 2);
    }
}
