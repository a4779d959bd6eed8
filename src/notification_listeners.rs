use crossbeam_channel::{Receiver, Sender, TryRecvError};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex};

/// Asynchronous notifications the server may send about a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionBlockedNotification {
    /// The server has stopped reading from this connection (typically because of a resource
    /// alarm); publishes will not be processed until it is unblocked. Carries the server's reason.
    Blocked(String),

    /// The server has resumed reading from this connection.
    Unblocked,
}

/// Fan-out of notifications to every live [`NotificationListener`].
pub(crate) struct NotificationListeners<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

struct Registry<T> {
    next_id: u64,
    listeners: IndexMap<u64, Sender<T>>,
}

impl<T: Clone> NotificationListeners<T> {
    pub(crate) fn new() -> Self {
        NotificationListeners {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: IndexMap::new(),
            })),
        }
    }

    pub(crate) fn register_listener(&self) -> NotificationListener<T> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut registry = self.registry.lock().unwrap();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.insert(id, tx);
        NotificationListener {
            registry: Arc::clone(&self.registry),
            id,
            rx,
        }
    }

    pub(crate) fn broadcast(&self, note: T) {
        let registry = self.registry.lock().unwrap();
        for tx in registry.listeners.values() {
            // listeners deregister on drop, so a failed send only races with that drop
            let _ = tx.send(note.clone());
        }
    }
}

/// Receives notifications until dropped.
pub struct NotificationListener<T> {
    registry: Arc<Mutex<Registry<T>>>,
    id: u64,
    rx: Receiver<T>,
}

impl<T> NotificationListener<T> {
    pub fn receiver(&self) -> &Receiver<T> {
        &self.rx
    }

    /// The next pending notification, if any, without blocking.
    pub fn try_next(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(note) => Some(note),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

impl<T> Drop for NotificationListener<T> {
    fn drop(&mut self) {
        self.registry.lock().unwrap().listeners.remove(&self.id);
    }
}
