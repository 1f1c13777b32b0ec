use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nanoedge_executor::ExecutionMode;
use nanoedge_executor::ExecutionUnit;
use nanoedge_executor::ExecutorHandle;
use nanoedge_executor::ScriptExecutor;
use nanoedge_protocol::ChildEvent;
use nanoedge_protocol::ChildMessage;
use nanoedge_protocol::HostMessage;
use nanoedge_state::PortError;
use nanoedge_state::Store;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::sync::watch;
use tracing::info;
use tracing::warn;

use crate::ServiceError;

/// How long a child may take between spawn and its `ready` frame.
const SERVICE_START_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period between the `stop` message and the forced kill.
const SERVICE_STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Starting,
    Running,
    Stopped,
    Error,
}

/// A service child that is up and proxyable.
#[derive(Debug)]
pub struct RunningService {
    name: String,
    port: u16,
    handle: Mutex<Option<ExecutorHandle>>,
}

impl RunningService {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// One row of the `/status` services listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSummary {
    pub name: String,
    pub status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Clone)]
enum ServiceState {
    Starting,
    Running(Arc<RunningService>),
    Failed(String),
}

/// In-memory registry of running services with lazy start-on-first-request.
///
/// The registry is the only owner of live child handles. Per name, the
/// first request installs a placeholder and performs the start; requests
/// arriving while the state is `Starting` wait for the transition instead
/// of spawning a second child.
pub struct ServiceManager {
    store: Store,
    executor: ScriptExecutor,
    services: Mutex<HashMap<String, watch::Receiver<ServiceState>>>,
}

impl ServiceManager {
    pub fn new(store: Store, executor: ScriptExecutor) -> Self {
        Self {
            store,
            executor,
            services: Mutex::new(HashMap::new()),
        }
    }

    /// Return the running instance for `name`, starting it first if needed.
    pub async fn get_or_start(&self, name: &str) -> Result<Arc<RunningService>, ServiceError> {
        loop {
            let installed = {
                let mut services = self.services.lock().await;
                match services.get(name) {
                    Some(rx) => Some(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(ServiceState::Starting);
                        services.insert(name.to_string(), rx);
                        drop(services);
                        return self.start_and_publish(name, tx).await;
                    }
                }
            };

            let Some(mut rx) = installed else {
                continue;
            };
            loop {
                let state = rx.borrow().clone();
                match state {
                    ServiceState::Running(service) => return Ok(service),
                    ServiceState::Failed(message) => {
                        return Err(ServiceError::StartFailed {
                            name: name.to_string(),
                            message,
                        });
                    }
                    ServiceState::Starting => {
                        if rx.changed().await.is_err() {
                            // The starter was cancelled before publishing a
                            // result. Evict its placeholder so the next
                            // attempt starts fresh, then race again.
                            let mut services = self.services.lock().await;
                            if services
                                .get(name)
                                .is_some_and(|existing| existing.same_channel(&rx))
                            {
                                services.remove(name);
                            }
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn start_and_publish(
        &self,
        name: &str,
        tx: watch::Sender<ServiceState>,
    ) -> Result<Arc<RunningService>, ServiceError> {
        match self.start_service(name).await {
            Ok(service) => {
                let _ = tx.send(ServiceState::Running(Arc::clone(&service)));
                info!(service = name, port = service.port(), "service started");
                Ok(service)
            }
            Err(err) => {
                let _ = tx.send(ServiceState::Failed(err.to_string()));
                self.services.lock().await.remove(name);
                Err(err)
            }
        }
    }

    async fn start_service(&self, name: &str) -> Result<Arc<RunningService>, ServiceError> {
        let record = self
            .store
            .get_service(name)
            .await?
            .filter(|record| record.enabled)
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))?;

        // Sticky reuse: a port attached on an earlier start survives stops
        // of the process, so the same service comes back on the same port.
        let port = match self.store.port_for_service(name).await? {
            Some(port) => port,
            None => self.store.allocate_port(name).await?,
        };

        let unit = ExecutionUnit {
            code: record.code,
            permissions: record.permissions,
            mode: ExecutionMode::Service {
                service_name: name.to_string(),
                port,
            },
        };
        let mut handle = match self.executor.spawn(unit).await {
            Ok(handle) => handle,
            Err(err) => {
                self.release_port_quietly(name).await;
                return Err(ServiceError::StartFailed {
                    name: name.to_string(),
                    message: err.to_string(),
                });
            }
        };

        match self.await_ready(&mut handle).await {
            Ok(()) => Ok(Arc::new(RunningService {
                name: name.to_string(),
                port,
                handle: Mutex::new(Some(handle)),
            })),
            Err(message) => {
                handle.terminate();
                self.release_port_quietly(name).await;
                Err(ServiceError::StartFailed {
                    name: name.to_string(),
                    message,
                })
            }
        }
    }

    /// Drain adapter frames until the listener reports ready.
    async fn await_ready(&self, handle: &mut ExecutorHandle) -> Result<(), String> {
        let deadline = tokio::time::Instant::now() + SERVICE_START_TIMEOUT;
        loop {
            let frame = tokio::time::timeout_at(deadline, handle.recv()).await;
            match frame {
                Ok(Some(ChildMessage::Event(ChildEvent::Ready))) => return Ok(()),
                Ok(Some(ChildMessage::Event(ChildEvent::Error { message, .. }))) => {
                    return Err(message);
                }
                Ok(Some(ChildMessage::Event(ChildEvent::Console { level, data }))) => {
                    info!(target: "service", level = level.as_str(), %data, "console");
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    let tail = handle.stderr_tail();
                    if tail.is_empty() {
                        return Err("child exited before binding its listener".to_string());
                    }
                    return Err(tail);
                }
                Err(_) => return Err("timed out waiting for the service listener".to_string()),
            }
        }
    }

    /// Stop a service: `stop` message, grace period, forced kill, port
    /// release, removal from the registry. Idempotent.
    pub async fn stop(&self, name: &str) -> Result<(), ServiceError> {
        let removed = self.services.lock().await.remove(name);
        let running = removed.and_then(|rx| {
            let state = rx.borrow().clone();
            match state {
                ServiceState::Running(service) => Some(service),
                _ => None,
            }
        });
        if let Some(service) = running
            && let Some(handle) = service.handle.lock().await.take()
        {
            let _ = handle.send(HostMessage::Stop).await;
            let exited = handle.exited();
            if tokio::time::timeout(SERVICE_STOP_GRACE, exited.cancelled())
                .await
                .is_err()
            {
                warn!(service = name, "child ignored stop; killing");
            }
            handle.terminate();
        }

        self.release_port_quietly(name).await;
        info!(service = name, "service stopped");
        Ok(())
    }

    /// Stop every running service, sequentially, best-effort.
    pub async fn stop_all(&self) {
        let names: Vec<String> = self.services.lock().await.keys().cloned().collect();
        for name in names {
            if let Err(err) = self.stop(&name).await {
                warn!(service = %name, "failed to stop service: {err}");
            }
        }
    }

    /// Live view for `/status` and the admin listing.
    pub async fn summaries(&self) -> Vec<ServiceSummary> {
        let services = self.services.lock().await;
        let mut summaries: Vec<ServiceSummary> = services
            .iter()
            .map(|(name, rx)| match rx.borrow().clone() {
                ServiceState::Running(service) => ServiceSummary {
                    name: name.clone(),
                    status: ServiceStatus::Running,
                    port: Some(service.port()),
                },
                ServiceState::Starting => ServiceSummary {
                    name: name.clone(),
                    status: ServiceStatus::Starting,
                    port: None,
                },
                ServiceState::Failed(_) => ServiceSummary {
                    name: name.clone(),
                    status: ServiceStatus::Error,
                    port: None,
                },
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    pub async fn status_of(&self, name: &str) -> Option<ServiceStatus> {
        let services = self.services.lock().await;
        services.get(name).map(|rx| match *rx.borrow() {
            ServiceState::Running(_) => ServiceStatus::Running,
            ServiceState::Starting => ServiceStatus::Starting,
            ServiceState::Failed(_) => ServiceStatus::Error,
        })
    }

    async fn release_port_quietly(&self, name: &str) {
        match self.store.release_port(name).await {
            Ok(port) => info!(service = name, port, "released port"),
            Err(PortError::NotAllocated(_)) => {
                // Stopping a service that never started is routine.
                warn!(service = name, "no port to release");
            }
            Err(err) => warn!(service = name, "failed to release port: {err}"),
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use nanoedge_protocol::Permissions;
    use nanoedge_state::CreateServiceParams;
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::PermissionsExt;

    async fn manager_with(script: &str) -> anyhow::Result<(Arc<ServiceManager>, tempfile::TempDir)> {
        let dir = tempfile::tempdir()?;
        let runner = dir.path().join("runner.sh");
        tokio::fs::write(&runner, format!("#!/bin/sh\n{script}\n")).await?;
        let mut permissions = std::fs::metadata(&runner)?.permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(&runner, permissions)?;

        let store = Store::open_in_memory().await?;
        store.ensure_port_range(9001, 9004).await?;
        store
            .create_service(&CreateServiceParams {
                name: "hello".to_string(),
                code: "Deno.serve(() => new Response());".to_string(),
                enabled: true,
                jwt_check: false,
                permissions: Permissions::default(),
                schema: None,
            })
            .await?;

        let executor = ScriptExecutor::with_runner(runner, dir.path().join("static"));
        Ok((Arc::new(ServiceManager::new(store, executor)), dir))
    }

    const READY_THEN_WAIT: &str = r#"echo '{"type":"ready"}'
sleep 60"#;

    #[tokio::test]
    async fn first_request_starts_and_allocates_lowest_port() -> anyhow::Result<()> {
        let (manager, _dir) = manager_with(READY_THEN_WAIT).await?;
        let service = manager.get_or_start("hello").await?;
        assert_eq!(service.port(), 9001);
        assert_eq!(
            manager.status_of("hello").await,
            Some(ServiceStatus::Running)
        );
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_first_touch_spawns_once() -> anyhow::Result<()> {
        let (manager, _dir) = manager_with(READY_THEN_WAIT).await?;
        let (a, b) = tokio::join!(manager.get_or_start("hello"), manager.get_or_start("hello"));
        let (a, b) = (a?, b?);
        assert_eq!(a.port(), b.port());
        assert!(Arc::ptr_eq(&a, &b), "both callers must see one instance");
        Ok(())
    }

    #[tokio::test]
    async fn start_failure_releases_port_and_reports_503_shape() -> anyhow::Result<()> {
        let (manager, _dir) = manager_with("exit 7").await?;
        let err = manager.get_or_start("hello").await;
        assert!(matches!(err, Err(ServiceError::StartFailed { .. })));
        // The port went back to the pool and the registry holds nothing.
        assert_eq!(manager.status_of("hello").await, None);
        let next = manager.get_or_start("hello").await;
        assert!(matches!(next, Err(ServiceError::StartFailed { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_service_is_not_found() -> anyhow::Result<()> {
        let (manager, _dir) = manager_with(READY_THEN_WAIT).await?;
        let err = manager.get_or_start("ghost").await;
        assert!(matches!(err, Err(ServiceError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_sticky_port_is_reused() -> anyhow::Result<()> {
        let (manager, _dir) = manager_with(READY_THEN_WAIT).await?;
        let first = manager.get_or_start("hello").await?;
        let port = first.port();
        drop(first);
        manager.stop("hello").await?;
        manager.stop("hello").await?;
        assert_eq!(manager.status_of("hello").await, None);

        // Released ports are reused lowest-first, so the restart gets the
        // same port back.
        let second = manager.get_or_start("hello").await?;
        assert_eq!(second.port(), port);
        Ok(())
    }
}
