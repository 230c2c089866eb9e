//! Graceful shutdown signal handling, shared by every service binary.

use tracing::warn;

/// Resolves once Ctrl+C or, on Unix, SIGTERM is received.
///
/// ```ignore
/// tokio::select! {
///     _ = collector_common::shutdown::wait_for_shutdown() => { /* drain and exit */ }
///     _ = run_service() => {}
/// }
/// ```
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}; only Ctrl+C will trigger shutdown");
                None
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(mut sig) = term_signal {
                    sig.recv().await;
                } else {
                    std::future::pending::<()>().await
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
