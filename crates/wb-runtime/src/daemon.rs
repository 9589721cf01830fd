//! `wb serve`: bind, announce, serve until ctrl-c or SIGTERM.

use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::context::AppContext;
use crate::ws_server::WsServer;

pub async fn run_daemon(config: ServerConfig) -> anyhow::Result<()> {
    let token_generated = config.token_generated;
    let ctx = AppContext::new(config);
    let cancel = CancellationToken::new();
    let server = WsServer::new(ctx.clone(), cancel.clone());
    let (listener, addr) = server.bind().await?;

    tracing::info!(
        root = %ctx.root().as_path().display(),
        addr = %addr,
        replay_lines = ctx.config.replay_lines,
        poll_interval_ms = ctx.config.poll_interval.as_millis() as u64,
        "wb serving"
    );
    if token_generated {
        // Printed once so the operator can log in; never logged elsewhere.
        tracing::info!(token = ctx.config.token.expose(), "generated access token");
    }

    let server_handle = tokio::spawn(async move { server.serve(listener).await });

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                },
                Err(e) => {
                    tracing::warn!(error = %e, "cannot register SIGTERM handler");
                    ctrl_c.await.ok();
                    tracing::info!("received ctrl-c, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::pin!(server_handle);
    tokio::select! {
        () = shutdown => {
            cancel.cancel();
            match (&mut server_handle).await {
                Ok(result) => result?,
                Err(e) => tracing::warn!(error = %e, "ws server task failed"),
            }
        }
        joined = &mut server_handle => {
            tracing::warn!("ws server exited unexpectedly");
            joined??;
        }
    }

    tracing::info!("wb stopped");
    Ok(())
}
