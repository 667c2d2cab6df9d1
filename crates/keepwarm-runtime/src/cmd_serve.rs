//! `keepwarm serve`: supervise a backend command behind the front server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use keepwarm_core::defaults::{DEFAULT_PORT, SINGLETON_INSTANCE_NAME};
use keepwarm_runtime::{
    ControllerConfig, EnvVars, FrontServer, InstanceController, ProcessBackend, ProcessConfig, SingletonRouter,
};
use tokio_util::sync::CancellationToken;

use crate::cli::ServeOpts;

/// Run until ctrl-c or SIGTERM, then stop the front server and the backend.
pub async fn run_serve(opts: ServeOpts) -> anyhow::Result<()> {
    let (program, args) = opts.command.split_first().context("missing backend command")?;
    let process = ProcessConfig::new(program.clone(), args.to_vec())
        .with_port(DEFAULT_PORT)
        .with_startup_timeout(Duration::from_millis(opts.startup_timeout_ms))
        .with_response_timeout(Duration::from_millis(opts.response_timeout_ms));
    let backend = Arc::new(ProcessBackend::new(process));

    let config = ControllerConfig {
        idle_timeout: opts.sleep_after,
        env: EnvVars::from_process(),
        ..ControllerConfig::default()
    };
    let controller = InstanceController::new(backend.clone(), config);
    let router = SingletonRouter::new(Arc::clone(&controller));

    let cancel = CancellationToken::new();
    let server = FrontServer::new(opts.listen, router.clone(), cancel.clone());
    let (listener, addr) = server
        .bind()
        .await
        .with_context(|| format!("failed to bind {}", opts.listen))?;

    tracing::info!(
        %addr,
        instance = SINGLETON_INSTANCE_NAME,
        program = %program,
        port = DEFAULT_PORT,
        sleep_after = ?opts.sleep_after,
        "keepwarm starting"
    );

    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = server.serve(listener).await {
            tracing::error!("front server error: {e}");
        }
    });

    tokio::select! {
        () = shutdown_signal() => {}
        _ = &mut server_handle => {
            tracing::warn!("front server exited unexpectedly");
        }
    }

    cancel.cancel();
    if let Some(handle) = controller.registry().get(router.key()) {
        let snapshot = serde_json::to_string(&controller.snapshot(&handle))?;
        tracing::info!(%snapshot, "final instance state");
    }
    backend.shutdown().await;
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await;
                tracing::info!("received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        tracing::info!("received ctrl-c, shutting down");
    }
}
