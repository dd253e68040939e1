//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::DeployerError;
use crate::notify::channel::NotificationChannel;
use crate::notify::Notification;
use crate::queue::{JobHandler, JobQueue, MemoryQueue};
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::{janitor, notifier};

/// Run the deployer until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DeployerError> {
    info!("Initializing site deployer...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager =
        ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, &shutdown_tx, &mut shutdown_manager).await {
        error!("Failed to start deployer: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), DeployerError> {
    let (app_state, notification_rx) = AppState::init(options)?;
    let app_state = Arc::new(app_state);

    init_notifier_worker(
        notification_rx,
        app_state.notification_channel.clone(),
        shutdown_manager,
    )?;

    init_queue_processing(app_state.clone(), shutdown_manager).await?;

    init_janitor_worker(
        options.janitor.clone(),
        app_state.queue.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    if options.enable_server {
        init_server(options, app_state.clone(), shutdown_manager, shutdown_tx.subscribe()).await?;
    }

    Ok(())
}

fn init_notifier_worker(
    rx: mpsc::Receiver<Notification>,
    channel: Arc<dyn NotificationChannel>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), DeployerError> {
    info!("Initializing notifier worker...");

    // Stopped separately, after the queue workers are gone
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let notifier_handle = tokio::spawn(async move {
        notifier::run(
            rx,
            channel.as_ref(),
            Box::pin(async move {
                let _ = stop_rx.await;
            }),
        )
        .await;
    });

    shutdown_manager.with_notifier_worker(notifier_handle, stop_tx)
}

async fn init_queue_processing(
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), DeployerError> {
    info!("Starting queue workers...");

    // Registered first so a failed `process` still gets a clean shutdown
    shutdown_manager.with_queue(app_state.queue.clone())?;

    let handler: Arc<dyn JobHandler> = app_state.orchestrator.clone();
    app_state.queue.process(handler).await?;
    Ok(())
}

fn init_janitor_worker(
    options: janitor::Options,
    queue: Arc<MemoryQueue>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DeployerError> {
    info!("Initializing janitor worker...");

    let janitor_handle = tokio::spawn(async move {
        janitor::run(
            &options,
            queue.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_janitor_worker_handle(janitor_handle)
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DeployerError> {
    info!("Initializing local HTTP server...");

    let server_state = ServerState::new(app_state.orchestrator.clone(), options.job_options);

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    server_handle: Option<JoinHandle<Result<(), DeployerError>>>,
    janitor_worker_handle: Option<JoinHandle<()>>,
    queue: Option<Arc<MemoryQueue>>,
    notifier_worker: Option<(JoinHandle<()>, oneshot::Sender<()>)>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            server_handle: None,
            janitor_worker_handle: None,
            queue: None,
            notifier_worker: None,
        }
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), DeployerError>>,
    ) -> Result<(), DeployerError> {
        if self.server_handle.is_some() {
            return Err(DeployerError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub fn with_janitor_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), DeployerError> {
        if self.janitor_worker_handle.is_some() {
            return Err(DeployerError::ShutdownError("janitor_handle already set".to_string()));
        }
        self.janitor_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_queue(&mut self, queue: Arc<MemoryQueue>) -> Result<(), DeployerError> {
        if self.queue.is_some() {
            return Err(DeployerError::ShutdownError("queue already set".to_string()));
        }
        self.queue = Some(queue);
        Ok(())
    }

    pub fn with_notifier_worker(
        &mut self,
        handle: JoinHandle<()>,
        stop_tx: oneshot::Sender<()>,
    ) -> Result<(), DeployerError> {
        if self.notifier_worker.is_some() {
            return Err(DeployerError::ShutdownError("notifier_handle already set".to_string()));
        }
        self.notifier_worker = Some((handle, stop_tx));
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), DeployerError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), DeployerError> {
        info!("Shutting down site deployer...");

        // 1. Server, so no new deployments are requested
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| DeployerError::ShutdownError(e.to_string()))??;
        }

        // 2. Janitor worker
        if let Some(handle) = self.janitor_worker_handle.take() {
            handle.await.map_err(|e| DeployerError::ShutdownError(e.to_string()))?;
        }

        // 3. Queue workers finish their in-flight attempt
        if let Some(queue) = self.queue.take() {
            queue.shutdown().await;
        }

        // 4. Notifier drains what the last attempts dispatched
        if let Some((handle, stop_tx)) = self.notifier_worker.take() {
            let _ = stop_tx.send(());
            handle.await.map_err(|e| DeployerError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
