use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::scheduler::ActiveJobGate;

/// Resolve with the name of the first termination signal received.
async fn termination_signal() -> std::io::Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Install a handler for SIGTERM and SIGINT.
///
/// On either signal the active job is cancelled first, so the engine stops
/// and the job's completion callback returns its nodes to Unallocated. Then
/// the returned token is cancelled.
pub fn install_shutdown_handler(gate: ActiveJobGate) -> CancellationToken {
    let token = CancellationToken::new();
    let shutdown = token.clone();

    tokio::spawn(async move {
        match termination_signal().await {
            Ok(name) => tracing::info!(signal = name, "Shutting down"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handlers");
                return;
            }
        }

        if gate.cancel_active_job() {
            tracing::info!("Cancelled the active job");
        }
        shutdown.cancel();
    });

    token
}
