use instance_state_server::{
    Config,
    InstanceStateServer,
};

use anyhow::{
    Context,
    Result,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{
    info,
    warn,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize a tracing subscriber
    let _guard = rust_tracing::trace();

    let config = Config::parse();
    let server = config.build().await?;
    let cancellation_token = CancellationToken::new();

    run_server(server, cancellation_token).await
}

async fn run_server(
    server: InstanceStateServer,
    cancellation_token: CancellationToken,
) -> Result<()> {
    let mut server_future = Box::pin(server.run(cancellation_token.clone()));

    tokio::select! {
        result = &mut server_future => {
            handle_server_result(result)
        },
        signal = shutdown_signal() => {
            match signal {
                Ok(()) => {
                    info!("Shutdown signal received, initiating graceful shutdown");
                    cancellation_token.cancel();
                }
                Err(e) => warn!(error = ?e, "Error setting up signal handler"),
            }
            handle_server_result(server_future.await)
        }
    }
}

/// Handle the result of the server
fn handle_server_result(result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => {
            info!("Server shutdown gracefully");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Server encountered an error: {}", e);
            Err(e).context("instance state server terminated unexpectedly")
        }
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C)
async fn shutdown_signal() -> Result<()> {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .context("failed to install SIGINT handler")?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
