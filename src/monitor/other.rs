use std::io;

use log::info;

/// Resolves on Ctrl-C
pub async fn create_signal_monitor() -> io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C, shutting down relays");
    Ok(())
}
