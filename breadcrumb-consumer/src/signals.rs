use std::future::Future;
use std::io;

use tokio::signal::unix::SignalKind;
use tracing::{info, warn};

/// Resolves on the first SIGINT or SIGTERM. Never resolves when neither
/// handler could be installed.
pub async fn wait_for_shutdown_signal() {
    let sigint = sigint(tokio::signal::ctrl_c());
    let mut sigterm = match tokio::signal::unix::signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("failed to install SIGTERM handler, only SIGINT stops the consumer: {}", e);
            sigint.await;
            return;
        }
    };

    tokio::select! {
        _ = sigint => {},
        Some(()) = sigterm.recv() => info!("received SIGTERM"),
    }
}

/// Waits for SIGINT. A handler that failed to register waits forever instead of
/// reading as an interrupt.
async fn sigint<F>(ctrl_c: F)
where
    F: Future<Output = io::Result<()>>,
{
    match ctrl_c.await {
        Ok(()) => info!("received SIGINT"),
        Err(e) => {
            warn!("failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_failed_sigint_registration_never_resolves() {
        let failed = std::future::ready(Err(io::Error::other("no handler")));

        let waited = tokio::time::timeout(Duration::from_secs(3600), sigint(failed)).await;

        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_sigint_resolves_once_received() {
        let received = std::future::ready(Ok(()));

        let waited = tokio::time::timeout(Duration::from_secs(1), sigint(received)).await;

        assert!(waited.is_ok());
    }
}
