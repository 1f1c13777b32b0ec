use std::sync::Arc;
use std::time::Duration;

use nanoedge_protocol::ConsoleLevel;
use nanoedge_state::ClaimedQueueEntry;
use nanoedge_state::Store;
use nanoedge_state::TraceEventKind;
use serde_json::Value;
use serde_json::json;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::FunctionDispatcher;
use crate::Reply;
use crate::StreamEvent;

/// Queue poll period: 5 Hz.
const TICK_PERIOD: Duration = Duration::from_millis(200);

/// Why an attempt failed; retried until the row runs out of retries.
struct AttemptFailure {
    message: String,
}

impl AttemptFailure {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Background loop that drains the task queue.
///
/// Each tick claims every `queued` row in one transaction and processes the
/// claims concurrently and independently: invoke the bound function, record
/// trace events in observed order, and apply fixed-delay retry within the
/// same claim. One executor instance owns the whole queue.
pub struct QueueExecutor {
    store: Store,
    dispatcher: Arc<FunctionDispatcher>,
}

impl QueueExecutor {
    pub fn new(store: Store, dispatcher: Arc<FunctionDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Run until `cancel` fires. Cancellation stops new claims immediately;
    /// in-flight attempts observe it at their next retry sleep.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticks = tokio::time::interval(TICK_PERIOD);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("queue executor started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticks.tick() => {}
            }
            let claims = match self.store.claim_queued().await {
                Ok(claims) => claims,
                Err(err) => {
                    warn!("queue claim failed: {err}");
                    continue;
                }
            };
            for claim in claims {
                let executor = Arc::clone(&self);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    executor.process(claim, cancel).await;
                });
            }
        }
        info!("queue executor stopped");
    }

    async fn process(&self, claim: ClaimedQueueEntry, cancel: CancellationToken) {
        let queue_id = claim.id;
        if let Err(err) = self.process_inner(claim, cancel).await {
            warn!(%queue_id, "queue row processing aborted: {err}");
        }
    }

    async fn process_inner(
        &self,
        claim: ClaimedQueueEntry,
        cancel: CancellationToken,
    ) -> Result<(), nanoedge_state::StoreError> {
        // The start event leads every trace, even when the row dies before
        // its first invocation attempt.
        let parsed: Result<Value, _> = serde_json::from_str(&claim.params);
        let start_data = parsed
            .as_ref()
            .ok()
            .cloned()
            .unwrap_or_else(|| Value::String(claim.params.clone()));
        self.store
            .append_trace(claim.id, TraceEventKind::Start, Some(&start_data))
            .await?;

        let Some(task) = self.store.get_task(claim.task_id).await? else {
            self.store
                .mark_queue_failed(claim.id, &json!({"message": "task record is gone"}))
                .await?;
            return Ok(());
        };
        let params = match parsed {
            Ok(params) => params,
            Err(err) => {
                self.store
                    .mark_queue_failed(
                        claim.id,
                        &json!({"message": format!("params are not valid JSON: {err}")}),
                    )
                    .await?;
                return Ok(());
            }
        };

        // The retry loop stays inside this claim: the row remains `running`
        // and no second `start` event is emitted.
        let mut remaining = claim.remaining_retries;
        loop {
            let failure = match self
                .attempt(claim.id, &task.bound_function_name, params.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(failure) => failure,
            };

            if remaining == 0 || cancel.is_cancelled() {
                self.store
                    .mark_queue_failed(claim.id, &json!({"message": failure.message}))
                    .await?;
                return Ok(());
            }

            info!(
                queue_id = %claim.id,
                remaining,
                "attempt failed, retrying in {} ms: {}",
                claim.retry_delay_ms,
                failure.message
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.store
                        .mark_queue_failed(claim.id, &json!({"message": failure.message}))
                        .await?;
                    return Ok(());
                }
                _ = tokio::time::sleep(Duration::from_millis(claim.retry_delay_ms)) => {}
            }
            remaining = self.store.decrement_queue_retries(claim.id).await?;
        }
    }

    /// One invocation attempt. `Ok` means the row reached `completed`.
    async fn attempt(
        &self,
        queue_id: uuid::Uuid,
        function_name: &str,
        params: Value,
    ) -> Result<(), AttemptFailure> {
        let reply = self
            .dispatcher
            .invoke(function_name, params)
            .await
            .map_err(|err| AttemptFailure::new(err.to_string()))?;

        match reply {
            Reply::Value {
                content_type,
                value,
                console,
            } => {
                if content_type != "application/json" {
                    return Err(AttemptFailure::new(format!(
                        "unsupported content type `{content_type}`"
                    )));
                }
                for (level, data) in console {
                    self.trace_console(queue_id, level, data).await;
                }
                self.store
                    .mark_queue_completed(queue_id, Some(&value))
                    .await
                    .map_err(|err| AttemptFailure::new(err.to_string()))?;
                Ok(())
            }
            Reply::Stream { mut events } => {
                while let Some(event) = events.recv().await {
                    match event {
                        StreamEvent::Progress(value) => {
                            self.store
                                .append_trace(queue_id, TraceEventKind::Stream, Some(&value))
                                .await
                                .map_err(|err| AttemptFailure::new(err.to_string()))?;
                        }
                        StreamEvent::Console { level, data } => {
                            self.trace_console(queue_id, level, data).await;
                        }
                        StreamEvent::Done(result) => {
                            self.store
                                .mark_queue_completed(queue_id, result.as_ref())
                                .await
                                .map_err(|err| AttemptFailure::new(err.to_string()))?;
                            return Ok(());
                        }
                        StreamEvent::Failed { message } => {
                            return Err(AttemptFailure::new(message));
                        }
                    }
                }
                Err(AttemptFailure::new("stream closed without a result"))
            }
        }
    }

    async fn trace_console(&self, queue_id: uuid::Uuid, level: ConsoleLevel, data: Value) {
        let kind = match level {
            ConsoleLevel::Log => TraceEventKind::Log,
            ConsoleLevel::Warning => TraceEventKind::Warning,
            ConsoleLevel::Error => TraceEventKind::Error,
            ConsoleLevel::Trace => TraceEventKind::Trace,
        };
        if let Err(err) = self.store.append_trace(queue_id, kind, Some(&data)).await {
            warn!(%queue_id, "failed to record console trace: {err}");
        }
    }
}
