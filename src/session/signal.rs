use tokio::sync::watch;

/// One-shot notification that the camera went away.
///
/// Each connection lifetime has its own signal; once fired it stays fired.
#[derive(Debug, Clone)]
pub struct DisconnectSignal {
    rx: watch::Receiver<bool>,
}

impl DisconnectSignal {
    pub fn is_fired(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the connection this signal belongs to is lost.
    pub async fn wait(&mut self) {
        // A closed channel means the session is gone, which counts as lost
        let _ = self.rx.wait_for(|fired| *fired).await;
    }
}

/// Firing side, owned by the session
pub(crate) struct DisconnectNotifier {
    tx: Option<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl DisconnectNotifier {
    pub(crate) fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Some(tx), rx }
    }

    pub(crate) fn subscribe(&self) -> DisconnectSignal {
        DisconnectSignal {
            rx: self.rx.clone(),
        }
    }

    /// Fire the signal. Returns false if it had already fired.
    pub(crate) fn fire(&mut self) -> bool {
        match self.tx.take() {
            Some(tx) => {
                tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Start a fresh lifetime unless the current one is still unfired.
    pub(crate) fn rearm(&mut self) {
        if self.tx.is_none() {
            *self = Self::new();
        }
    }
}
