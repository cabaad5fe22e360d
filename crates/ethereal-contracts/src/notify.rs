use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

/// In-process publish/subscribe for typed change notifications.
///
/// Every subscriber owns a channel receiver. Publishing clones the event into
/// each live channel; receivers that were dropped are pruned on the next
/// publish.
#[derive(Debug)]
pub struct ChangeBus<E> {
    subscribers: Arc<Mutex<Vec<Sender<E>>>>,
}

impl<E> Clone for ChangeBus<E> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<E> Default for ChangeBus<E> {
    fn default() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<E: Clone + Send + 'static> ChangeBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription<E> {
        let (sender, receiver) = mpsc::channel();
        self.lock().push(sender);
        Subscription { receiver }
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, event: E) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Sender<E>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug)]
pub struct Subscription<E> {
    receiver: Receiver<E>,
}

impl<E> Subscription<E> {
    pub fn try_next(&self) -> Option<E> {
        self.receiver.try_recv().ok()
    }

    /// Everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<E> {
        self.receiver.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::ChangeBus;

    #[test]
    fn publish_reaches_every_subscriber() {
        let bus = ChangeBus::new();
        let first = bus.subscribe();
        let second = bus.subscribe();

        assert_eq!(bus.publish("saved".to_string()), 2);
        assert_eq!(first.try_next().as_deref(), Some("saved"));
        assert_eq!(second.try_next().as_deref(), Some("saved"));
        assert_eq!(first.try_next(), None);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = ChangeBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());

        assert_eq!(bus.publish(1_u32), 1);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.drain(), vec![1]);
    }

    #[test]
    fn drain_keeps_publish_order() {
        let bus = ChangeBus::new();
        let sub = bus.subscribe();
        bus.clone().publish(1_u32);
        bus.publish(2);
        bus.publish(3);
        assert_eq!(sub.drain(), vec![1, 2, 3]);
    }
}
