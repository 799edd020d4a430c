use tokio::sync::broadcast;

/// Install a Ctrl+C handler that broadcasts a shutdown signal
///
/// Each subscriber can pass `rx.recv()` as the cancellation future of a
/// pending acquire.
pub fn setup() -> Result<broadcast::Sender<()>, ctrlc::Error> {
    let (tx, _) = broadcast::channel(1);
    let signal = tx.clone();

    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received");
        // Err only means nobody is listening any more
        let _ = signal.send(());
    })?;

    Ok(tx)
}
