use std::time::Duration;

use nanoedge_executor::ExecutionMode;
use nanoedge_executor::ExecutionUnit;
use nanoedge_executor::ExecutorError;
use nanoedge_executor::ExecutorHandle;
use nanoedge_executor::ScriptExecutor;
use nanoedge_protocol::ChildEvent;
use nanoedge_protocol::ChildMessage;
use nanoedge_protocol::ConsoleLevel;
use nanoedge_protocol::HostMessage;
use nanoedge_state::Store;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::info;

use crate::InvokeError;

/// Bound on in-flight stream frames. When the consumer stops draining
/// (slow or disconnected client) the pump blocks here instead of buffering,
/// and a dropped receiver tears the child down.
const STREAM_CHANNEL_CAPACITY: usize = 16;

/// One frame of a streaming invocation, in generation order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A value yielded by the generator.
    Progress(Value),
    /// Console output captured mid-stream.
    Console { level: ConsoleLevel, data: Value },
    /// The generator completed; its return value, if any.
    Done(Option<Value>),
    /// The generator threw or the invocation timed out.
    Failed { message: String },
}

/// The dispatcher's view of a finished (or streaming) invocation. The HTTP
/// layer renders it as a JSON/text/HTML/binary body or an SSE stream; the
/// queue executor consumes it directly.
#[derive(Debug)]
pub enum Reply {
    Value {
        content_type: String,
        value: Value,
        console: Vec<(ConsoleLevel, Value)>,
    },
    Stream {
        events: mpsc::Receiver<StreamEvent>,
    },
}

/// Spawns one sandboxed child per invocation and adapts its frames.
pub struct FunctionDispatcher {
    store: Store,
    executor: ScriptExecutor,
}

impl FunctionDispatcher {
    pub fn new(store: Store, executor: ScriptExecutor) -> Self {
        Self { store, executor }
    }

    /// Invoke `function_name` with `params` as its single input.
    ///
    /// The configured execution timeout covers the whole invocation; when a
    /// stream is still open at the deadline it is failed and the child
    /// terminated. Client disconnects propagate the same way: dropping the
    /// stream receiver aborts the generator and kills the child.
    pub async fn invoke(&self, function_name: &str, params: Value) -> Result<Reply, InvokeError> {
        let record = self
            .store
            .get_function(function_name)
            .await?
            .ok_or_else(|| InvokeError::NotFound(function_name.to_string()))?;
        if !record.enabled {
            return Err(InvokeError::Disabled(function_name.to_string()));
        }
        let timeout_ms = self.store.function_timeout_ms().await?;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);

        let unit = ExecutionUnit {
            code: record.code,
            permissions: record.permissions,
            mode: ExecutionMode::Function {
                function_name: function_name.to_string(),
            },
        };
        let mut handle = self.executor.spawn(unit).await?;
        handle.send(HostMessage::Input { value: params }).await?;

        // Phase one: wait for the adapter to classify the reply.
        let mut console = Vec::new();
        let mut content_type: Option<String> = None;
        loop {
            let frame = match tokio::time::timeout_at(deadline, handle.recv()).await {
                Ok(frame) => frame,
                Err(_) => {
                    handle.terminate();
                    return Err(InvokeError::Timeout(timeout_ms));
                }
            };
            match frame {
                Some(ChildMessage::ContentType(frame)) => {
                    if frame.content_type == "text/event-stream" {
                        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
                        tokio::spawn(pump_stream(handle, tx, deadline));
                        return Ok(Reply::Stream { events: rx });
                    }
                    content_type = Some(frame.content_type);
                }
                Some(ChildMessage::Event(ChildEvent::Result { value })) => {
                    return Ok(Reply::Value {
                        content_type: content_type
                            .unwrap_or_else(|| "application/json".to_string()),
                        value,
                        console,
                    });
                }
                Some(ChildMessage::Event(ChildEvent::Error { message, stack })) => {
                    return Err(InvokeError::Executor(ExecutorError::from_child_report(
                        &message, stack,
                    )));
                }
                Some(ChildMessage::Event(ChildEvent::Console { level, data })) => {
                    info!(target: "function", function = function_name, level = level.as_str(), %data, "console");
                    console.push((level, data));
                }
                Some(ChildMessage::Event(_)) => {}
                None => {
                    let tail = handle.stderr_tail();
                    if tail.is_empty() {
                        return Err(InvokeError::Executor(ExecutorError::ChannelClosed));
                    }
                    return Err(InvokeError::Executor(ExecutorError::ModuleLoad {
                        message: tail,
                    }));
                }
            }
        }
    }
}

/// Forward stream frames in generation order until the generator settles,
/// the deadline passes, or the consumer goes away.
async fn pump_stream(
    mut handle: ExecutorHandle,
    tx: mpsc::Sender<StreamEvent>,
    deadline: tokio::time::Instant,
) {
    loop {
        let frame = match tokio::time::timeout_at(deadline, handle.recv()).await {
            Ok(frame) => frame,
            Err(_) => {
                let _ = tx
                    .send(StreamEvent::Failed {
                        message: "function execution timed out".to_string(),
                    })
                    .await;
                break;
            }
        };
        let event = match frame {
            Some(ChildMessage::Event(ChildEvent::Progress { value })) => {
                StreamEvent::Progress(value)
            }
            Some(ChildMessage::Event(ChildEvent::StreamResult { value })) => {
                let result = if value.is_null() { None } else { Some(value) };
                let _ = tx.send(StreamEvent::Done(result)).await;
                break;
            }
            Some(ChildMessage::Event(ChildEvent::Error { message, .. })) => {
                let _ = tx.send(StreamEvent::Failed { message }).await;
                break;
            }
            Some(ChildMessage::Event(ChildEvent::Console { level, data })) => {
                StreamEvent::Console { level, data }
            }
            Some(_) => continue,
            None => {
                let _ = tx
                    .send(StreamEvent::Failed {
                        message: "stream ended before its result".to_string(),
                    })
                    .await;
                break;
            }
        };
        if tx.send(event).await.is_err() {
            // Consumer is gone: abort the generator, then kill the child.
            let _ = handle.send(HostMessage::Abort).await;
            break;
        }
    }
    handle.terminate();
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use nanoedge_protocol::Permissions;
    use nanoedge_state::CreateFunctionParams;
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::PermissionsExt;

    async fn dispatcher_with(
        script: &str,
    ) -> anyhow::Result<(FunctionDispatcher, Store, tempfile::TempDir)> {
        let dir = tempfile::tempdir()?;
        let runner = dir.path().join("runner.sh");
        tokio::fs::write(&runner, format!("#!/bin/sh\n{script}\n")).await?;
        let mut permissions = std::fs::metadata(&runner)?.permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(&runner, permissions)?;

        let store = Store::open_in_memory().await?;
        store
            .create_function(&CreateFunctionParams {
                name: "echo".to_string(),
                code: "export default (x) => x;".to_string(),
                enabled: true,
                permissions: Permissions::default(),
                description: None,
            })
            .await?;

        let executor = ScriptExecutor::with_runner(runner, dir.path().join("static"));
        Ok((
            FunctionDispatcher::new(store.clone(), executor),
            store,
            dir,
        ))
    }

    /// Waits for the input frame, then replies like the function adapter.
    const JSON_REPLY: &str = r#"read line
echo '{"contentType":"application/json"}'
echo '{"type":"result","value":{"ok":true}}'"#;

    #[tokio::test]
    async fn value_reply_carries_content_type() -> anyhow::Result<()> {
        let (dispatcher, _store, _dir) = dispatcher_with(JSON_REPLY).await?;
        let reply = dispatcher
            .invoke("echo", serde_json::json!({"a": 1}))
            .await?;
        match reply {
            Reply::Value {
                content_type,
                value,
                ..
            } => {
                assert_eq!(content_type, "application/json");
                assert_eq!(value, serde_json::json!({"ok": true}));
            }
            Reply::Stream { .. } => panic!("expected a value reply"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn stream_reply_preserves_yield_order() -> anyhow::Result<()> {
        let (dispatcher, _store, _dir) = dispatcher_with(
            r#"read line
echo '{"contentType":"text/event-stream"}'
echo '{"type":"progress","value":1}'
echo '{"type":"progress","value":2}'
echo '{"type":"stream-result","value":{}}'"#,
        )
        .await?;
        let reply = dispatcher.invoke("echo", serde_json::json!({})).await?;
        let Reply::Stream { mut events } = reply else {
            panic!("expected a stream reply");
        };
        assert_eq!(events.recv().await, Some(StreamEvent::Progress(1.into())));
        assert_eq!(events.recv().await, Some(StreamEvent::Progress(2.into())));
        assert_eq!(
            events.recv().await,
            Some(StreamEvent::Done(Some(serde_json::json!({}))))
        );
        assert_eq!(events.recv().await, None);
        Ok(())
    }

    #[tokio::test]
    async fn thrown_error_surfaces_with_message() -> anyhow::Result<()> {
        let (dispatcher, _store, _dir) = dispatcher_with(
            r#"read line
echo '{"type":"error","message":"boom","stack":"at unit.js:1"}'"#,
        )
        .await?;
        let err = dispatcher.invoke("echo", serde_json::json!({})).await;
        assert!(matches!(
            err,
            Err(InvokeError::Executor(ExecutorError::HandlerThrew { .. }))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn disabled_function_is_rejected() -> anyhow::Result<()> {
        let (dispatcher, store, _dir) = dispatcher_with(JSON_REPLY).await?;
        store
            .update_function(
                "echo",
                &nanoedge_state::UpdateFunctionParams {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await?;
        let err = dispatcher.invoke("echo", serde_json::json!({})).await;
        assert!(matches!(err, Err(InvokeError::Disabled(_))));
        Ok(())
    }

    #[tokio::test]
    async fn missing_function_is_not_found() -> anyhow::Result<()> {
        let (dispatcher, _store, _dir) = dispatcher_with(JSON_REPLY).await?;
        let err = dispatcher.invoke("ghost", serde_json::json!({})).await;
        assert!(matches!(err, Err(InvokeError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn slow_child_hits_the_configured_timeout() -> anyhow::Result<()> {
        let (dispatcher, store, _dir) = dispatcher_with("sleep 60").await?;
        store
            .set_config("function_execution_timeout_ms", "100")
            .await?;
        let err = dispatcher.invoke("echo", serde_json::json!({})).await;
        assert!(matches!(err, Err(InvokeError::Timeout(100))));
        Ok(())
    }
}
