//! Cooperative stop signal shared by every worker of a run.

use tokio::sync::watch;

/// Sender side. Dropping it does not stop the run.
#[derive(Debug)]
pub struct StopHandle(watch::Sender<bool>);

impl StopHandle {
    /// Ask every worker to stop after its current step.
    pub fn stop(&self) {
        self.0.send_replace(true);
    }
}

/// Receiver side, cloned into each worker.
#[derive(Debug, Clone)]
pub struct StopSignal(watch::Receiver<bool>);

/// Create a connected handle and signal.
pub fn stop_signal() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle(tx), StopSignal(rx))
}

impl StopSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, signal) = stop_signal();
        signal
    }

    /// Whether a stop was requested.
    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve once a stop is requested. Pends forever if the handle is gone.
    pub async fn stopped(&mut self) {
        if self.0.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
