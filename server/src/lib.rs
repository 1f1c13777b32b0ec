//! The HTTP front door: one listener routing reverse-proxied services,
//! function invocations, the admin surface, and runtime introspection.

mod admin;
mod auth;
mod docs;
mod error;
mod frontend;
mod gateway;
mod static_files;
mod status;

pub use auth::issue;
pub use auth::verify;
pub use error::ApiError;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::middleware;
use axum::routing::any;
use axum::routing::get;
use axum::routing::post;
use chrono::DateTime;
use chrono::Utc;
use nanoedge_core::FunctionDispatcher;
use nanoedge_core::QueueExecutor;
use nanoedge_core::ServiceManager;
use nanoedge_executor::ScriptExecutor;
use nanoedge_protocol::Permissions;
use nanoedge_state::CreateServiceParams;
use nanoedge_state::Store;
use rand::RngCore;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

/// How long shutdown may take before remaining children are abandoned to
/// their kill-on-drop fate.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

/// The example service seeded into a fresh store.
const HELLO_SERVICE_CODE: &str =
    r#"Deno.serve(() => Response.json({ message: "Hello, World!" }));"#;

#[derive(Clone)]
pub struct AppState {
    store: Store,
    services: Arc<ServiceManager>,
    dispatcher: Arc<FunctionDispatcher>,
    client: reqwest::Client,
    static_root: PathBuf,
    started_at: DateTime<Utc>,
    main_port: u16,
}

impl AppState {
    pub fn new(
        store: Store,
        executor: ScriptExecutor,
        static_root: PathBuf,
        main_port: u16,
    ) -> Self {
        let services = Arc::new(ServiceManager::new(store.clone(), executor.clone()));
        let dispatcher = Arc::new(FunctionDispatcher::new(store.clone(), executor));
        Self {
            store,
            services,
            dispatcher,
            client: reqwest::Client::new(),
            static_root,
            started_at: Utc::now(),
            main_port,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn services(&self) -> &Arc<ServiceManager> {
        &self.services
    }

    pub fn dispatcher(&self) -> &Arc<FunctionDispatcher> {
        &self.dispatcher
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn static_root(&self) -> &PathBuf {
        &self.static_root
    }

    pub(crate) fn main_port(&self) -> u16 {
        self.main_port
    }

    pub(crate) async fn jwt_secret(&self) -> Result<String, ApiError> {
        self.store
            .jwt_secret()
            .await
            .map_err(ApiError::from)?
            .ok_or_else(|| ApiError::Internal("jwt secret is not configured".to_string()))
    }
}

/// Prepare a store for serving: port reservation table, JWT secret, and the
/// seeded example service on first boot.
pub async fn bootstrap(store: &Store) -> anyhow::Result<()> {
    let (start, end) = store.port_range().await?;
    store.ensure_port_range(start, end).await?;

    if store.jwt_secret().await?.is_none() {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let secret: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        store.set_config(nanoedge_state::config::JWT_SECRET, &secret).await?;
        warn!("generated a fresh jwt_secret; tokens will not survive a store swap");
    }

    if store.list_services().await?.is_empty() {
        store
            .create_service(&CreateServiceParams {
                name: "hello".to_string(),
                code: HELLO_SERVICE_CODE.to_string(),
                enabled: true,
                jwt_check: false,
                permissions: Permissions::default(),
                schema: None,
            })
            .await?;
        info!("seeded the hello example service");
    }
    Ok(())
}

/// The front-door route table; order matters, first match wins.
pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .merge(admin::router())
        .route("/host-frontend", post(frontend::host_frontend))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin,
        ));

    Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::health))
        .route("/openapi.json", get(docs::openapi_spec))
        .route("/docs", get(docs::swagger_ui))
        .route("/static/{*path}", get(static_files::serve))
        .route("/jwt/create", post(auth::mint_token))
        .route("/api/docs/{service}", get(docs::service_docs))
        .route("/api/docs/openapi/{service}", get(docs::service_openapi))
        .route("/api/v2/{*rest}", any(gateway::proxy_service))
        .route("/functions/v2/{function}", post(gateway::invoke_function))
        .nest("/admin-api/v2", admin)
        .with_state(state)
}

/// Everything `run` needs, resolved by the CLI.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: Option<PathBuf>,
    pub static_root: PathBuf,
}

/// Boot the runtime and serve until SIGINT/SIGTERM. A bounded drain stops
/// the queue executor and every running service child before returning.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let store = match &config.db_path {
        Some(path) => Store::open(path).await?,
        None => Store::open_in_memory().await?,
    };
    bootstrap(&store).await?;

    let executor = ScriptExecutor::new(config.static_root.clone())?;
    let state = AppState::new(store.clone(), executor, config.static_root, config.port);

    let shutdown = CancellationToken::new();
    let queue = Arc::new(QueueExecutor::new(
        store.clone(),
        Arc::clone(state.dispatcher()),
    ));
    let queue_task = tokio::spawn(queue.run(shutdown.clone()));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{addr}");

    let serve = axum::serve(
        listener,
        router(state.clone()).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(wait_for_signal(shutdown.clone()));
    serve.await?;

    // The listener is gone; drain the runtime plane.
    shutdown.cancel();
    let drain = async {
        state.services().stop_all().await;
        let _ = queue_task.await;
    };
    if tokio::time::timeout(SHUTDOWN_DRAIN, drain).await.is_err() {
        warn!("shutdown drain timed out; children are killed on drop");
    }
    info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = shutdown.cancelled() => {}
    }
    info!("shutdown signal received");
}
