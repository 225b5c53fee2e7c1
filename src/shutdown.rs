use tokio::sync::watch;

/// Resolves once a stop has been signalled, or the signalling side has gone away.
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    // An error means the sender was dropped, which we treat as a stop.
    let _ = stop.wait_for(|stopped| *stopped).await;
}
