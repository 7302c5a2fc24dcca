use tokio::sync::broadcast;
use tracing::debug;

/// Fire-and-forget operator notifications. Cheap to clone; with no receiver
/// attached a send is a no-op, never an error.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<String>,
}

impl Notifier {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<String>) {
        let (tx, rx) = broadcast::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn notify(&self, text: impl Into<String>) {
        if let Err(e) = self.tx.send(text.into()) {
            debug!("notification dropped, no listeners: {}", e);
        }
    }
}
