//! Signal-driven cancellation for the restorekit CLI

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `token` when SIGINT or SIGTERM (Ctrl+C or Ctrl+Break on Windows) arrives.
pub fn install_signal_handlers(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to install signal handlers, falling back to Ctrl+C");
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
                info!("Received Ctrl+C, canceling restore");
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, canceling restore"),
        _ = sigint.recv() => info!("Received SIGINT, canceling restore"),
    }
}

#[cfg(windows)]
async fn wait_for_signal() {
    use tokio::signal::windows;

    let (mut ctrl_c, mut ctrl_break) = match (windows::ctrl_c(), windows::ctrl_break()) {
        (Ok(ctrl_c), Ok(ctrl_break)) => (ctrl_c, ctrl_break),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "Failed to install console handlers");
            std::future::pending::<()>().await;
            return;
        }
    };

    tokio::select! {
        _ = ctrl_c.recv() => info!("Received Ctrl+C, canceling restore"),
        _ = ctrl_break.recv() => info!("Received Ctrl+Break, canceling restore"),
    }
}
