use tokio::sync::broadcast;

use crate::domain::Announcement;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Announcement>,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Announcement> {
        self.tx.subscribe()
    }

    pub fn publish(&self, announcement: Announcement) {
        // no subscribers is fine; slow ones may lag and miss some
        let _ = self.tx.send(announcement);
    }
}
