use tokio::sync::broadcast;

/// Listens for the server shutdown signal. Modeled on the teacher's
/// `mqtt_core::Shutdown`: every background loop (elector ticker, heartbeat
/// emitter, peer-sweeper, matchmaker scanner, cancel-match sweep) holds one
/// and checks it at every tick boundary (spec.md §5, §9).
#[derive(Debug)]
pub struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}

impl Clone for Shutdown {
    fn clone(&self) -> Self {
        Shutdown {
            is_shutdown: self.is_shutdown,
            notify: self.notify.resubscribe(),
        }
    }
}
