//! Chat events and the shared buffer between the listener and the dispatcher.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// What arrived on the chat feed.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// A plain text message.
    Text(String),
    /// Path to an image the listener saved to disk.
    Image(PathBuf),
    /// Path to a video the listener saved to disk.
    Video(PathBuf),
}

/// One observed chat event. Immutable once created; consumed by exactly
/// one dispatch cycle.
#[derive(Debug, Clone)]
pub struct ChatEvent {
    pub kind: EventKind,
    pub timestamp: Instant,
}

impl ChatEvent {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Text(content.into()),
            timestamp: Instant::now(),
        }
    }

    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: EventKind::Image(path.into()),
            timestamp: Instant::now(),
        }
    }

    pub fn video(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: EventKind::Video(path.into()),
            timestamp: Instant::now(),
        }
    }
}

/// Lock-guarded event queue shared between the listener thread (producer)
/// and the dispatcher loop (consumer).
///
/// The lock is the only shared-mutation boundary in the bridge. Both
/// operations hold it for the minimum critical section; it is never held
/// across file I/O or an API call.
#[derive(Clone, Default)]
pub struct EventBuffer {
    inner: Arc<Mutex<Vec<ChatEvent>>>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event in arrival order.
    pub fn push(&self, event: ChatEvent) {
        let mut buf = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        buf.push(event);
    }

    /// Atomically snapshot the current contents and clear the buffer.
    ///
    /// Every pushed event appears in exactly one drain, in its original
    /// relative order. Draining an empty buffer returns an empty vec.
    pub fn drain(&self) -> Vec<ChatEvent> {
        let mut buf = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *buf)
    }

    pub fn len(&self) -> usize {
        let buf = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn texts(events: &[ChatEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| match &e.kind {
                EventKind::Text(t) => t.clone(),
                other => panic!("expected text event, got {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_drain_returns_events_in_arrival_order() {
        let buffer = EventBuffer::new();
        buffer.push(ChatEvent::text("a"));
        buffer.push(ChatEvent::text("b"));
        buffer.push(ChatEvent::text("c"));

        let drained = buffer.drain();
        assert_eq!(texts(&drained), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_drain_empty_buffer_is_empty_and_harmless() {
        let buffer = EventBuffer::new();
        assert!(buffer.drain().is_empty());
        assert!(buffer.drain().is_empty());
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_events_appear_in_exactly_one_drain() {
        let buffer = EventBuffer::new();
        buffer.push(ChatEvent::text("a"));
        buffer.push(ChatEvent::text("b"));

        let first = buffer.drain();
        buffer.push(ChatEvent::text("c"));
        let second = buffer.drain();
        let third = buffer.drain();

        assert_eq!(texts(&first), vec!["a", "b"]);
        assert_eq!(texts(&second), vec!["c"]);
        assert!(third.is_empty());
    }

    #[test]
    fn test_concurrent_pushes_are_never_lost_or_duplicated() {
        let buffer = EventBuffer::new();
        let mut handles = Vec::new();

        for t in 0..4 {
            let buffer = buffer.clone();
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    buffer.push(ChatEvent::text(format!("{t}:{i}")));
                }
            }));
        }

        let drainer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                let mut seen = Vec::new();
                for _ in 0..50 {
                    seen.extend(texts(&buffer.drain()));
                    thread::yield_now();
                }
                seen
            })
        };

        for handle in handles {
            handle.join().unwrap();
        }
        let mut seen = drainer.join().unwrap();
        seen.extend(texts(&buffer.drain()));

        assert_eq!(seen.len(), 400);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 400);
    }

    #[test]
    fn test_relative_order_preserved_within_one_producer() {
        let buffer = EventBuffer::new();
        for i in 0..10 {
            buffer.push(ChatEvent::text(i.to_string()));
        }
        buffer.push(ChatEvent::image("/tmp/a.jpg"));
        buffer.push(ChatEvent::text("tail"));

        let drained = buffer.drain();
        assert_eq!(drained.len(), 12);
        assert!(matches!(drained[10].kind, EventKind::Image(_)));
        assert!(matches!(&drained[11].kind, EventKind::Text(t) if t == "tail"));
    }
}
