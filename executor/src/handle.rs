use std::sync::Arc;
use std::sync::Mutex;

use nanoedge_protocol::ChildMessage;
use nanoedge_protocol::HostMessage;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::ExecutorError;
use crate::adapter::MaterializedUnit;

/// Size of the bounded channels between the handle and its pump tasks.
const CHANNEL_CAPACITY: usize = 128;

/// Bytes of stderr kept for post-mortem classification of a dead child.
const STDERR_TAIL_LIMIT: usize = 8 * 1024;

/// Live connection to a sandboxed child: a send/recv message channel plus
/// forced termination. Owns the child process, its pump tasks, and the
/// scratch directory; dropping the handle tears all of them down.
#[derive(Debug)]
pub struct ExecutorHandle {
    outgoing_tx: mpsc::Sender<HostMessage>,
    events_rx: mpsc::Receiver<ChildMessage>,
    kill: CancellationToken,
    exited: CancellationToken,
    stderr_tail: Arc<Mutex<String>>,
    _unit: MaterializedUnit,
}

impl ExecutorHandle {
    pub(crate) fn new(mut child: Child, unit: MaterializedUnit) -> Self {
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<HostMessage>(CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel::<ChildMessage>(CHANNEL_CAPACITY);
        let kill = CancellationToken::new();
        let exited = CancellationToken::new();
        let stderr_tail = Arc::new(Mutex::new(String::new()));

        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                while let Some(message) = outgoing_rx.recv().await {
                    let mut line = match serde_json::to_vec(&message) {
                        Ok(line) => line,
                        Err(err) => {
                            debug!("failed to encode host message: {err}");
                            continue;
                        }
                    };
                    line.push(b'\n');
                    if stdin.write_all(&line).await.is_err() {
                        break;
                    }
                    if stdin.flush().await.is_err() {
                        break;
                    }
                }
            });
        }

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ChildMessage>(&line) {
                        Ok(message) => {
                            if events_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => debug!("unparseable child frame: {err}, line: {line}"),
                    }
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let stderr_tail = Arc::clone(&stderr_tail);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "sandbox", "{line}");
                    if let Ok(mut tail) = stderr_tail.lock() {
                        tail.push_str(&line);
                        tail.push('\n');
                        if tail.len() > STDERR_TAIL_LIMIT {
                            let cut = tail.len() - STDERR_TAIL_LIMIT;
                            tail.drain(..cut);
                        }
                    }
                }
            });
        }

        {
            let kill = kill.clone();
            let exited = exited.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = kill.cancelled() => {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                    }
                    status = child.wait() => {
                        if let Ok(status) = status
                            && !status.success()
                        {
                            debug!("sandbox child exited with {status}");
                        }
                    }
                }
                exited.cancel();
            });
        }

        Self {
            outgoing_tx,
            events_rx,
            kill,
            exited,
            stderr_tail,
            _unit: unit,
        }
    }

    /// Queue a message for the child. Fails once the child is gone.
    pub async fn send(&self, message: HostMessage) -> Result<(), ExecutorError> {
        self.outgoing_tx
            .send(message)
            .await
            .map_err(|_| ExecutorError::ChannelClosed)
    }

    /// Next frame from the child; `None` once the child closed its stdout.
    pub async fn recv(&mut self) -> Option<ChildMessage> {
        self.events_rx.recv().await
    }

    /// Cancelled when the child process has exited for any reason.
    pub fn exited(&self) -> CancellationToken {
        self.exited.clone()
    }

    /// Tail of the child's stderr, for diagnostics after an early death.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail
            .lock()
            .map(|tail| tail.clone())
            .unwrap_or_default()
    }

    /// Tear the child down: best-effort `stop` so the adapter can cancel
    /// its listener, then a forced kill. Safe to call more than once.
    pub fn terminate(&self) {
        let _ = self.outgoing_tx.try_send(HostMessage::Stop);
        self.kill.cancel();
    }
}

impl Drop for ExecutorHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use crate::ExecutionMode;
    use crate::ExecutionUnit;
    use crate::ScriptExecutor;
    use nanoedge_protocol::ChildEvent;
    use nanoedge_protocol::Permissions;
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    /// A stand-in runner: speaks one ready frame, echoes nothing else, and
    /// waits so termination paths can be exercised without a JS engine.
    async fn stub_executor(script: &str) -> anyhow::Result<(ScriptExecutor, tempfile::TempDir)> {
        let dir = tempfile::tempdir()?;
        let runner = dir.path().join("runner.sh");
        tokio::fs::write(&runner, format!("#!/bin/sh\n{script}\n")).await?;
        let mut permissions = std::fs::metadata(&runner)?.permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(&runner, permissions)?;
        let static_root = dir.path().join("static");
        Ok((
            ScriptExecutor::with_runner(runner, static_root),
            dir,
        ))
    }

    fn unit() -> ExecutionUnit {
        ExecutionUnit {
            code: "export default (x) => x;".to_string(),
            permissions: Permissions::default(),
            mode: ExecutionMode::Function {
                function_name: "echo".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn frames_from_the_child_are_parsed_in_order() -> anyhow::Result<()> {
        let (executor, _dir) = stub_executor(
            r#"echo '{"type":"ready"}'
echo '{"contentType":"application/json"}'
echo '{"type":"result","value":42}'"#,
        )
        .await?;
        let mut handle = executor.spawn(unit()).await?;

        assert_eq!(
            handle.recv().await,
            Some(ChildMessage::Event(ChildEvent::Ready))
        );
        assert!(matches!(
            handle.recv().await,
            Some(ChildMessage::ContentType(_))
        ));
        assert_eq!(
            handle.recv().await,
            Some(ChildMessage::Event(ChildEvent::Result { value: 42.into() }))
        );
        assert_eq!(handle.recv().await, None);
        Ok(())
    }

    #[tokio::test]
    async fn terminate_kills_a_lingering_child() -> anyhow::Result<()> {
        let (executor, _dir) = stub_executor("sleep 60").await?;
        let handle = executor.spawn(unit()).await?;
        let exited = handle.exited();
        handle.terminate();
        tokio::time::timeout(Duration::from_secs(5), exited.cancelled()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn dropping_the_handle_reaps_the_child() -> anyhow::Result<()> {
        let (executor, _dir) = stub_executor("sleep 60").await?;
        let handle = executor.spawn(unit()).await?;
        let exited = handle.exited();
        drop(handle);
        tokio::time::timeout(Duration::from_secs(5), exited.cancelled()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn stderr_is_captured_for_diagnostics() -> anyhow::Result<()> {
        let (executor, _dir) = stub_executor("echo 'boom' >&2").await?;
        let handle = executor.spawn(unit()).await?;
        tokio::time::timeout(Duration::from_secs(5), handle.exited().cancelled()).await?;
        // Give the stderr pump a beat to drain.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.stderr_tail().contains("boom"));
        Ok(())
    }
}
