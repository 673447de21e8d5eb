//! Backend event frames and listener dispatch.
//!
//! The backend pushes unsolicited frames tagged with a reserved leading
//! argument. The connection's reader queues them; a dedicated dispatch task
//! drains the queue and invokes registered listeners in arrival order, so
//! slow callbacks never stall the socket reader.

use parking_lot::RwLock;
use reclink_protocol::{Packet, EVENT_MARKER};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One unsolicited backend message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEvent {
    /// The event body (second wire argument).
    pub message: String,
    /// Remaining wire arguments.
    pub extra: Vec<String>,
}

impl BackendEvent {
    /// Parses an event from a wire frame; `None` if the frame is not tagged
    /// as an event.
    pub fn from_packet(packet: &Packet) -> Option<Self> {
        if packet.arg(0) != Some(EVENT_MARKER) {
            return None;
        }
        Some(Self {
            message: packet.arg(1).unwrap_or_default().to_string(),
            extra: packet.args.iter().skip(2).cloned().collect(),
        })
    }
}

/// Handle for unregistering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&BackendEvent) + Send + Sync>;

/// Registered event callbacks, invoked in registration order.
pub struct ListenerRegistry {
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add(&self, listener: impl Fn(&BackendEvent) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener; returns whether it was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn notify(&self, event: &BackendEvent) {
        // Clone the callback list so a listener may add or remove listeners
        // without deadlocking.
        let snapshot: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_event_from_packet() {
        let packet = Packet::from_args([
            EVENT_MARKER,
            "SYSTEM_EVENT CLIENT_CONNECTED HOSTNAME frontend1",
            "empty",
        ]);
        let event = BackendEvent::from_packet(&packet).unwrap();
        assert!(event.message.starts_with("SYSTEM_EVENT"));
        assert_eq!(event.extra, vec!["empty"]);
    }

    #[test]
    fn test_reply_is_not_an_event() {
        let packet = Packet::from_args(["ACCEPT", "91"]);
        assert!(BackendEvent::from_packet(&packet).is_none());
    }

    #[test]
    fn test_listener_add_remove_notify() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_a = Arc::clone(&seen);
        let a = registry.add(move |e: &BackendEvent| {
            seen_a.lock().unwrap().push(format!("a:{}", e.message));
        });
        let seen_b = Arc::clone(&seen);
        let _b = registry.add(move |e: &BackendEvent| {
            seen_b.lock().unwrap().push(format!("b:{}", e.message));
        });
        assert_eq!(registry.len(), 2);

        let event = BackendEvent {
            message: "RECORDING_LIST_CHANGE".to_string(),
            extra: Vec::new(),
        };
        registry.notify(&event);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["a:RECORDING_LIST_CHANGE", "b:RECORDING_LIST_CHANGE"]
        );

        assert!(registry.remove(a));
        assert!(!registry.remove(a));
        registry.notify(&event);
        assert_eq!(seen.lock().unwrap().len(), 3);
    }
}
