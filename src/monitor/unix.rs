use std::io;

use log::info;
use tokio::signal::unix::{signal, SignalKind};

/// Resolves when the process receives `SIGTERM` or `SIGINT`
pub async fn create_signal_monitor() -> io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let signal_name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };

    info!("received {}, shutting down relays", signal_name);

    Ok(())
}
