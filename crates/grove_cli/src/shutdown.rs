//! Graceful termination on operator signals.
//!
//! The first interrupt/terminate/quit finalises the live progress line
//! and cancels the root token; the engine then drains its in-flight
//! work and the process exits through the normal path with a non-zero
//! code. A second signal force-quits.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::progress::ProgressLogger;

/// Install the signal handler for a sync run.
pub fn install(cancel: CancellationToken, logger: Arc<ProgressLogger>) {
    tokio::spawn(async move {
        wait_for_signal().await;

        logger.end_progress_line("cancelled");
        cancel.cancel();
        tracing::debug!("shutdown requested, draining in-flight work");

        wait_for_signal().await;
        std::process::exit(130);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).ok();
    let mut quit = signal(SignalKind::quit()).ok();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = recv_or_pending(&mut term) => {}
        _ = recv_or_pending(&mut quit) => {}
    }
}

#[cfg(unix)]
async fn recv_or_pending(stream: &mut Option<tokio::signal::unix::Signal>) {
    match stream {
        Some(stream) => {
            stream.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
