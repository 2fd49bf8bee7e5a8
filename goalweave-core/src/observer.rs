//! Explicit subscription lists with stable handles for world-state
//! notifications.

/// Handle returned on subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObserverHandle(u64);

/// Ordered list of observers of one notification kind.
///
/// Observers run synchronously on the notifying thread and must not mutate
/// the world state they observe.
pub struct ObserverBus<T: ?Sized> {
    next_handle: u64,
    observers: Vec<(ObserverHandle, Box<dyn FnMut(&T)>)>,
}

impl<T: ?Sized> Default for ObserverBus<T> {
    fn default() -> Self {
        Self {
            next_handle: 0,
            observers: Vec::new(),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for ObserverBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverBus")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl<T: ?Sized> ObserverBus<T> {
    pub fn subscribe(&mut self, observer: impl FnMut(&T) + 'static) -> ObserverHandle {
        let handle = ObserverHandle(self.next_handle);
        self.next_handle += 1;
        self.observers.push((handle, Box::new(observer)));
        handle
    }

    pub fn unsubscribe(&mut self, handle: ObserverHandle) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(h, _)| *h != handle);
        self.observers.len() != before
    }

    pub fn notify(&mut self, value: &T) {
        for (_, observer) in &mut self.observers {
            observer(value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_subscribe_notify_unsubscribe() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut bus: ObserverBus<u32> = ObserverBus::default();
        let seen_in = seen.clone();
        let handle = bus.subscribe(move |v| seen_in.borrow_mut().push(*v));
        bus.notify(&1);
        assert!(bus.unsubscribe(handle));
        bus.notify(&2);
        assert_eq!(*seen.borrow(), vec![1]);
        assert!(!bus.unsubscribe(handle));
    }

    #[test]
    fn test_handles_stay_stable_across_removals() {
        let mut bus: ObserverBus<u32> = ObserverBus::default();
        let first = bus.subscribe(|_| {});
        let second = bus.subscribe(|_| {});
        assert!(bus.unsubscribe(first));
        let third = bus.subscribe(|_| {});
        assert_ne!(second, third);
        assert!(bus.unsubscribe(second));
        assert!(bus.unsubscribe(third));
        assert!(bus.is_empty());
    }
}
