//! OS signal handling.
//!
//! A single async helper that completes when the process receives a
//! termination signal. The entry point wires its completion to the
//! supervisor's cancellation token and returns promptly; all actual
//! teardown happens at the supervisor's wait points.
//!
//! On Unix SIGINT, SIGTERM and SIGQUIT are handled, with
//! `tokio::signal::ctrl_c` awaited as a fallback. Elsewhere only ctrl-c is
//! available.

#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
