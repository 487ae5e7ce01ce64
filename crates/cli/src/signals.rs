use crate::error::Error;
use flume::Sender;
use tokio::signal::unix::{SignalKind, signal};

/// Indefinitely listens to signals and sends signal events to the provided channel.
pub async fn wait_for_signal(signal_event: &Sender<SignalEvent>) -> Result<(), Error> {
    let mut sigusr1 = signal(SignalKind::user_defined1()).map_err(Error::SignalHandler)?;
    let mut sigusr2 = signal(SignalKind::user_defined2()).map_err(Error::SignalHandler)?;
    let mut sighup = signal(SignalKind::hangup()).map_err(Error::SignalHandler)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(Error::SignalHandler)?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(Error::SignalHandler)?;

    loop {
        let event = tokio::select! {
            _ = sigusr1.recv() => SignalEvent::Rescan,
            _ = sigusr2.recv() => SignalEvent::DumpStatus,
            _ = sighup.recv() => SignalEvent::Reload,
            _ = sigterm.recv() => SignalEvent::Shutdown,
            _ = sigint.recv() => SignalEvent::Shutdown,
        };
        signal_event.send_async(event).await?;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGUSR1: poll immediately.
    Rescan,
    /// SIGUSR2: log the loop status.
    DumpStatus,
    /// SIGHUP: re-read the configuration file.
    Reload,
    /// SIGTERM or SIGINT.
    Shutdown,
}
