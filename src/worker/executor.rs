use std::time::Duration;

use tokio::sync::oneshot;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::cluster::HostConfig;
use crate::error::{ClustermError, Result};
use crate::scheduler::JobLog;
use crate::worker::engine::{ConfigurationEngine, EngineRun, OutputStream};

/// How long a cancelled engine gets to report that it has stopped.
pub const ENGINE_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Stream an engine run's output into `log` and resolve its final status.
///
/// Cancelling `cancel` fires the engine's own trigger and waits (up to
/// [`ENGINE_STOP_TIMEOUT`]) for the engine to report its final status before
/// returning [`ClustermError::Cancelled`].
pub async fn log_output_and_return_status(
    run: EngineRun,
    cancel: &CancellationToken,
    log: &JobLog,
) -> Result<()> {
    let EngineRun {
        mut output,
        cancel: engine_cancel,
        mut result,
    } = run;

    let cancelled = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break true,
            line = output.next() => match line {
                Some(line) => {
                    tracing::debug!(line = %line, "Engine output");
                    log.append(line);
                }
                None => break false,
            },
        }
    };
    if cancelled {
        return stop_engine(output, &engine_cancel, result).await;
    }

    let status = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        status = &mut result => Some(status),
    };
    match status {
        Some(status) => status.unwrap_or_else(|_| {
            Err(ClustermError::Internal(
                "engine finished without reporting a status".to_string(),
            ))
        }),
        None => stop_engine(output, &engine_cancel, result).await,
    }
}

/// Fire the engine's trigger and wait for it to stop.
async fn stop_engine(
    output: OutputStream,
    engine_cancel: &CancellationToken,
    result: oneshot::Receiver<Result<()>>,
) -> Result<()> {
    // Dropping the stream unblocks an engine waiting to send output.
    drop(output);
    engine_cancel.cancel();

    match tokio::time::timeout(ENGINE_STOP_TIMEOUT, result).await {
        Ok(Ok(status)) => {
            tracing::info!(engine_status = ?status.err(), "Engine stopped after cancellation");
        }
        Ok(Err(_)) => tracing::warn!("Engine dropped its status while stopping"),
        Err(_) => tracing::error!(
            timeout_secs = ENGINE_STOP_TIMEOUT.as_secs(),
            "Engine did not stop after cancellation"
        ),
    }
    Err(ClustermError::Cancelled)
}

/// Configure `hosts`, running cleanup against the same hosts on failure.
///
/// Cleanup's own outcome is only logged: the configuration error is what the
/// caller gets back. A cancelled job skips cleanup.
pub async fn configure_or_cleanup(
    engine: &dyn ConfigurationEngine,
    hosts: &[HostConfig],
    extra_vars: &str,
    cancel: CancellationToken,
    log: JobLog,
) -> Result<()> {
    let run = engine.configure(hosts, extra_vars);
    let cfg_err = match log_output_and_return_status(run, &cancel, &log).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    if cancel.is_cancelled() {
        tracing::warn!(hosts = hosts.len(), "Configuration cancelled, cleanup skipped");
        log.append("cleanup skipped, job cancelled");
        return Err(cfg_err);
    }

    tracing::error!(error = %cfg_err, hosts = hosts.len(), "Configuration failed, starting cleanup");
    log.append(format!("configuration failed, starting cleanup. Error: {}", cfg_err));

    let run = engine.cleanup(hosts, extra_vars);
    if let Err(e) = log_output_and_return_status(run, &cancel, &log).await {
        tracing::error!(error = %e, "Cleanup failed");
        log.append(format!("cleanup failed. Error: {}", e));
    }

    Err(cfg_err)
}
