//! Observer lists used for engine events
//!
//! An [`Observable`] keeps callbacks in registration order. Each callback gets
//! the event payload and an [`EventState`] it can use to stop propagation.

use std::fmt;

/// Handle returned by [`Observable::add`], used to remove the observer later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

/// Propagation state shared by all observers during one notification
#[derive(Debug, Clone, Default)]
pub struct EventState {
    pub mask: u32,
    pub skip_next_observers: bool,
    pub last_return_value: Option<f32>,
}

impl EventState {
    pub fn new(mask: u32) -> Self {
        Self {
            mask,
            ..Default::default()
        }
    }
}

type Callback<T> = Box<dyn FnMut(&mut T, &mut EventState)>;

struct Observer<T> {
    handle: ObserverHandle,
    mask: u32,
    once: bool,
    callback: Callback<T>,
}

/// Ordered list of callbacks notified with a mutable payload
pub struct Observable<T> {
    observers: Vec<Observer<T>>,
    next_handle: u64,
}

impl<T> Default for Observable<T> {
    fn default() -> Self {
        Self {
            observers: Vec::new(),
            next_handle: 0,
        }
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl<T> Observable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer receiving every notification
    pub fn add<F>(&mut self, callback: F) -> ObserverHandle
    where
        F: FnMut(&mut T, &mut EventState) + 'static,
    {
        self.push(callback, u32::MAX, false, false)
    }

    /// Registers an observer only called when the notification mask matches
    pub fn add_with_mask<F>(&mut self, mask: u32, callback: F) -> ObserverHandle
    where
        F: FnMut(&mut T, &mut EventState) + 'static,
    {
        self.push(callback, mask, false, false)
    }

    /// Registers an observer removed after its first call
    pub fn add_once<F>(&mut self, callback: F) -> ObserverHandle
    where
        F: FnMut(&mut T, &mut EventState) + 'static,
    {
        self.push(callback, u32::MAX, true, false)
    }

    /// Registers an observer ahead of the existing ones
    pub fn add_first<F>(&mut self, callback: F) -> ObserverHandle
    where
        F: FnMut(&mut T, &mut EventState) + 'static,
    {
        self.push(callback, u32::MAX, false, true)
    }

    fn push<F>(&mut self, callback: F, mask: u32, once: bool, first: bool) -> ObserverHandle
    where
        F: FnMut(&mut T, &mut EventState) + 'static,
    {
        let handle = ObserverHandle(self.next_handle);
        self.next_handle += 1;
        let observer = Observer {
            handle,
            mask,
            once,
            callback: Box::new(callback),
        };
        if first {
            self.observers.insert(0, observer);
        } else {
            self.observers.push(observer);
        }
        handle
    }

    pub fn remove(&mut self, handle: ObserverHandle) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| o.handle != handle);
        before != self.observers.len()
    }

    /// Notifies matching observers in order
    ///
    /// # Returns
    /// `false` when an observer asked to skip the remaining observers
    pub fn notify_observers(&mut self, payload: &mut T, mask: u32) -> bool {
        let mut state = EventState::new(mask);
        let mut fired_once = Vec::new();

        for observer in self.observers.iter_mut() {
            if observer.mask & mask == 0 {
                continue;
            }
            (observer.callback)(payload, &mut state);
            if observer.once {
                fired_once.push(observer.handle);
            }
            if state.skip_next_observers {
                break;
            }
        }

        if !fired_once.is_empty() {
            self.observers.retain(|o| !fired_once.contains(&o.handle));
        }

        !state.skip_next_observers
    }

    /// Notifies with the default mask
    pub fn notify(&mut self, payload: &mut T) -> bool {
        self.notify_observers(payload, u32::MAX)
    }

    pub fn has_observers(&self) -> bool {
        !self.observers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn clear(&mut self) {
        self.observers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_notify_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut observable = Observable::<u32>::new();

        let l = log.clone();
        observable.add(move |v, _| l.borrow_mut().push(("a", *v)));
        let l = log.clone();
        observable.add_first(move |v, _| l.borrow_mut().push(("b", *v)));

        assert!(observable.notify(&mut 7));
        assert_eq!(*log.borrow(), vec![("b", 7), ("a", 7)]);
    }

    #[test]
    fn test_skip_next_observers() {
        let mut observable = Observable::<u32>::new();
        observable.add(|v, state| {
            *v += 1;
            state.skip_next_observers = true;
        });
        observable.add(|v, _| *v += 100);

        let mut value = 0;
        assert!(!observable.notify(&mut value));
        assert_eq!(value, 1);
    }

    #[test]
    fn test_once_and_remove() {
        let mut observable = Observable::<u32>::new();
        observable.add_once(|v, _| *v += 1);
        let handle = observable.add(|v, _| *v += 10);

        let mut value = 0;
        observable.notify(&mut value);
        observable.notify(&mut value);
        assert_eq!(value, 21);

        assert!(observable.remove(handle));
        assert!(!observable.remove(handle));
        assert!(!observable.has_observers());
    }

    #[test]
    fn test_mask_filtering() {
        let mut observable = Observable::<u32>::new();
        observable.add_with_mask(0b10, |v, _| *v += 1);
        let mut value = 0;
        observable.notify_observers(&mut value, 0b01);
        assert_eq!(value, 0);
        observable.notify_observers(&mut value, 0b10);
        assert_eq!(value, 1);
    }
}
