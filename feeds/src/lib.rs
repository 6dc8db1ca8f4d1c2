pub mod api;
pub mod backoff;
pub mod config;
pub mod converter;
pub mod errors;
pub mod event;
pub mod handler;
pub mod interceptor;
pub mod metrics_defs;
pub mod publisher;
pub mod registry;
pub mod storage;
pub mod types;

#[cfg(test)]
mod testutils;

use api::ApiError;
use config::{Config, StorageConfig, ValidationError};
use converter::Converter;
use errors::ServiceError;
use handler::{FeedHandlerFactory, HandlerError};
use interceptor::{Chain, DefaultInterceptor};
use publisher::{HttpPublisher, PublishError};
use registry::Registry;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use storage::{FilesystemStorage, MemoryStorage, Storage, StorageError};

#[derive(thiserror::Error, Debug)]
pub enum FeedsError {
    #[error("invalid config: {0}")]
    Config(#[from] ValidationError),
    #[error("could not open storage: {0}")]
    Storage(#[from] StorageError),
    #[error("could not create publisher: {0}")]
    Publisher(#[from] PublishError),
    #[error("could not resume feeds: {0}")]
    Resume(ServiceError),
    #[error("management API failed: {0}")]
    Api(#[from] ApiError),
    #[error("admin listener failed: {0}")]
    Admin(std::io::Error),
    #[error("could not listen for shutdown signals: {0}")]
    Signal(std::io::Error),
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("feed {id} failed: {error}")]
    Handler { id: String, error: HandlerError },
}

/// Runs the service until SIGINT or SIGTERM, a server failure or a fatal handler error,
/// then closes every handler within the shutdown deadline.
pub async fn run(config: Config) -> Result<(), FeedsError> {
    config.validate()?;
    let replica = config.replica.resolve_index()?;
    let shutdown = shutdown_signal().map_err(FeedsError::Signal)?;

    let storage: Arc<dyn Storage> = match &config.storage {
        StorageConfig::Memory => Arc::new(MemoryStorage::new()),
        StorageConfig::Filesystem { path } => Arc::new(FilesystemStorage::open(path).await?),
    };
    let publisher = Arc::new(HttpPublisher::new(&config.publisher)?);
    let default = DefaultInterceptor::new(
        Converter::new(&config.events.r#type),
        publisher,
        &config.publisher.group_id,
    );
    let chain = Arc::new(Chain::from_config(&config.interceptors, default));
    let factory = Arc::new(FeedHandlerFactory::new(config.handler.clone(), chain));
    let (registry, mut fatal_rx) = Registry::new(replica, storage, factory);
    let registry = Arc::new(registry);

    let ready = Arc::new(AtomicBool::new(false));
    let admin = AdminService::new({
        let ready = ready.clone();
        move || ready.load(Ordering::Relaxed)
    });
    let admin_listener = config.admin_listener.clone();
    let admin_task = tokio::spawn(async move {
        run_http_service(&admin_listener.host, admin_listener.port, admin).await
    });

    tracing::info!(replica, "Resuming feeds");
    if let Err(e) = registry.resume().await {
        registry.shutdown(config.shutdown_timeout()).await;
        admin_task.abort();
        return Err(FeedsError::Resume(e));
    }
    ready.store(true, Ordering::Relaxed);

    let api_task = tokio::spawn(api::serve(config.listener.clone(), registry.clone()));

    let result = tokio::select! {
        joined = api_task => match joined {
            Ok(served) => served.map_err(FeedsError::from),
            Err(e) => Err(e.into()),
        },
        joined = admin_task => match joined {
            Ok(served) => served.map_err(FeedsError::Admin),
            Err(e) => Err(e.into()),
        },
        Some(fatal) = fatal_rx.recv() => Err(FeedsError::Handler {
            id: fatal.id,
            error: fatal.error,
        }),
        signal = shutdown => {
            tracing::info!(signal, "Shutting down");
            Ok(())
        }
    };

    ready.store(false, Ordering::Relaxed);
    registry.shutdown(config.shutdown_timeout()).await;
    result
}

/// Resolves with the name of the first termination signal received.
/// Listeners are installed before this returns.
#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl Future<Output = &'static str>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl Future<Output = &'static str>> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
        "ctrl-c"
    })
}
