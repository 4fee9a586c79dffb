use std::sync::{Arc, Weak};

use parking_lot::Mutex;

pub trait Observable<T> {
    fn add_listener(&self, observer: Arc<dyn Observer<T>>);
    fn observers(&self) -> Vec<Weak<dyn Observer<T>>>;
    fn notify_observers(&self, event: &T) {
        for observer in self.observers() {
            if let Some(observer) = observer.upgrade() {
                observer.notify(event);
            }
        }
    }
}

pub trait Observer<T>: Sync + Send {
    fn notify(&self, event: &T);
}

/// Weakly held observer list. Dropped observers are pruned on the next registration.
pub struct Observers<T> {
    list: Mutex<Vec<Weak<dyn Observer<T>>>>,
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self {
            list: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Observers<T> {
    pub fn len(&self) -> usize {
        self.list
            .lock()
            .iter()
            .filter(|observer| observer.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Observable<T> for Observers<T> {
    fn add_listener(&self, observer: Arc<dyn Observer<T>>) {
        let mut list = self.list.lock();
        list.retain(|existing| existing.strong_count() > 0);
        list.push(Arc::downgrade(&observer));
    }

    // Snapshot so observers may register others while being notified.
    fn observers(&self) -> Vec<Weak<dyn Observer<T>>> {
        self.list.lock().clone()
    }
}
