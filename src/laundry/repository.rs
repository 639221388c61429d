//! Where laundry waits before and after the machine.

use crate::status::LaundryItem;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

const CANCEL_CHECK: Duration = Duration::from_millis(5);

/// A store of laundry items shared between producers and the machine.
pub trait LaundryRepository: Send + Sync {
    fn add(&self, item: LaundryItem);

    /// Take the oldest item, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout or when `token` fires.
    fn remove(&self, timeout: Duration, token: &CancellationToken) -> Option<LaundryItem>;

    /// Take everything currently stored.
    fn dump(&self) -> Vec<LaundryItem>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory FIFO bin.
#[derive(Debug, Default)]
pub struct LaundryBin {
    name: String,
    items: Mutex<VecDeque<LaundryItem>>,
    arrived: Condvar,
}

impl LaundryBin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Mutex::new(VecDeque::new()),
            arrived: Condvar::new(),
        }
    }

    pub fn with_items(name: impl Into<String>, items: impl IntoIterator<Item = LaundryItem>) -> Self {
        let bin = Self::new(name);
        bin.items.lock().extend(items);
        bin
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl LaundryRepository for LaundryBin {
    fn add(&self, item: LaundryItem) {
        trace!(bin = %self.name, item = %item.id(), "item added");
        self.items.lock().push_back(item);
        self.arrived.notify_one();
    }

    fn remove(&self, timeout: Duration, token: &CancellationToken) -> Option<LaundryItem> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        loop {
            if token.is_cancelled() {
                return None;
            }
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            // The token cannot wake the condvar, so wait in short slices.
            self.arrived.wait_for(&mut items, remaining.min(CANCEL_CHECK));
        }
    }

    fn dump(&self) -> Vec<LaundryItem> {
        self.items.lock().drain(..).collect()
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn item(description: &str) -> LaundryItem {
        LaundryItem::new(description, 100, 0)
    }

    #[test]
    fn items_come_out_in_arrival_order() {
        let bin = LaundryBin::with_items("dirty", [item("socks"), item("shirt")]);
        let token = CancellationToken::new();
        assert_eq!(bin.len(), 2);
        assert_eq!(bin.remove(Duration::ZERO, &token).unwrap().description(), "socks");
        assert_eq!(bin.remove(Duration::ZERO, &token).unwrap().description(), "shirt");
        assert!(bin.is_empty());
    }

    #[test]
    fn remove_times_out_on_an_empty_bin() {
        let bin = LaundryBin::new("dirty");
        let started = Instant::now();
        assert!(bin.remove(Duration::from_millis(30), &CancellationToken::new()).is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn remove_wakes_when_an_item_arrives() {
        let bin = Arc::new(LaundryBin::new("dirty"));
        let producer = {
            let bin = Arc::clone(&bin);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                bin.add(item("towel"));
            })
        };
        let taken = bin.remove(Duration::from_secs(2), &CancellationToken::new());
        producer.join().unwrap();
        assert_eq!(taken.unwrap().description(), "towel");
    }

    #[test]
    fn cancelled_remove_returns_none() {
        let bin = Arc::new(LaundryBin::new("dirty"));
        let token = CancellationToken::new();
        let waiter = {
            let bin = Arc::clone(&bin);
            let token = token.clone();
            thread::spawn(move || bin.remove(Duration::from_secs(5), &token))
        };
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(waiter.join().unwrap().is_none());
    }

    #[test]
    fn dump_empties_the_bin() {
        let bin = LaundryBin::with_items("clean", [item("a"), item("b"), item("c")]);
        assert_eq!(bin.dump().len(), 3);
        assert!(bin.is_empty());
        assert_eq!(bin.name(), "clean");
    }
}
