/// Resolves on the first shutdown request from the OS.
#[cfg(unix)]
pub async fn shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("Signal handlers should not panic.");
    let mut sigterm = signal(SignalKind::terminate()).expect("Signal handlers should not panic.");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

/// Resolves on the first shutdown request from the OS.
#[cfg(not(unix))]
pub async fn shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
