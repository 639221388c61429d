//! Event delivery thread.
//!
//! Events and task-completion callbacks are handed to a dedicated thread
//! over a channel, so nothing user-supplied ever runs on a thread that holds
//! a vault guard.

use crate::error::{fail_fast, MachineError};
use crate::framework::panic_message;
use crate::status::LaundryMachineStateCode;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};
use uuid::Uuid;

/// Something observers of a machine may want to know about.
#[derive(Clone, Debug, PartialEq)]
pub enum MachineEvent {
    StateChanged {
        old: LaundryMachineStateCode,
        new: LaundryMachineStateCode,
        change_count: u64,
        timestamp: DateTime<Utc>,
    },
    /// Diagnostic: a transition's predicate held and its procedure ran.
    TransitionPredicateTrue {
        state: LaundryMachineStateCode,
        transition: String,
        priority: u32,
    },
    UnexpectedFault {
        state: Option<LaundryMachineStateCode>,
        description: String,
    },
    Terminated {
        state: LaundryMachineStateCode,
    },
    Disposed,
    AccessTimedOut {
        resource: &'static str,
        timeout: Duration,
    },
    LaundryLoaded {
        id: Uuid,
    },
    LaundryUnloaded {
        id: Uuid,
    },
}

type Listener = Box<dyn Fn(&MachineEvent) + Send>;
type Callback = Box<dyn FnOnce() + Send>;

enum Dispatch {
    Event(MachineEvent),
    Callback(Callback),
}

#[derive(Default)]
struct Subscribers {
    channels: Vec<mpsc::Sender<MachineEvent>>,
    listeners: Vec<Listener>,
}

impl Subscribers {
    /// Deliver `event` with the lock released, so a listener may subscribe
    /// or add listeners. Anything registered meanwhile is kept after the
    /// existing entries and first sees the next event.
    fn deliver_unlocked(subscribers: &Mutex<Self>, event: &MachineEvent) {
        let mut taken = std::mem::take(&mut *subscribers.lock());
        taken.deliver(event);
        let mut current = subscribers.lock();
        let added = std::mem::replace(&mut *current, taken);
        current.channels.extend(added.channels);
        current.listeners.extend(added.listeners);
    }

    fn deliver(&mut self, event: &MachineEvent) {
        self.channels.retain(|tx| tx.send(event.clone()).is_ok());
        for listener in &self.listeners {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(event))) {
                error!(panic = %panic_message(payload.as_ref()), "event listener panicked");
            }
        }
    }
}

/// Owns the event-delivery thread.
pub struct EventPump {
    sender: Mutex<Option<mpsc::Sender<Dispatch>>>,
    subscribers: Arc<Mutex<Subscribers>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    terminated: Arc<AtomicBool>,
    thread: ThreadId,
}

impl EventPump {
    pub fn start() -> Result<Self, MachineError> {
        let (sender, receiver) = mpsc::channel::<Dispatch>();
        let subscribers = Arc::new(Mutex::new(Subscribers::default()));
        let terminated = Arc::new(AtomicBool::new(false));

        let handle = {
            let subscribers = Arc::clone(&subscribers);
            let terminated = Arc::clone(&terminated);
            thread::Builder::new()
                .name("laundry-events".to_string())
                .spawn(move || {
                    for dispatch in receiver {
                        match dispatch {
                            Dispatch::Event(event) => {
                                trace!(?event, "delivering event");
                                Subscribers::deliver_unlocked(&subscribers, &event);
                            }
                            Dispatch::Callback(callback) => {
                                if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
                                    error!(
                                        panic = %panic_message(payload.as_ref()),
                                        "completion callback panicked"
                                    );
                                }
                            }
                        }
                    }
                    terminated.store(true, Ordering::Release);
                    debug!("event thread terminated");
                })
                .map_err(|source| MachineError::Spawn {
                    thread: "event",
                    source,
                })?
        };

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            subscribers,
            thread: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
            terminated,
        })
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> mpsc::Receiver<MachineEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().channels.push(tx);
        rx
    }

    /// Invoke `listener` on the event thread for every event from now on.
    pub fn add_listener(&self, listener: impl Fn(&MachineEvent) + Send + 'static) {
        self.subscribers.lock().listeners.push(Box::new(listener));
    }

    /// Queue an event. Dropped silently once the pump is disposed.
    pub fn publish(&self, event: MachineEvent) {
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(Dispatch::Event(event));
        }
    }

    /// Queue a callback to run on the event thread.
    ///
    /// Returns the callback back if the pump no longer accepts work.
    pub fn post(&self, callback: impl FnOnce() + Send + 'static) -> Result<(), Callback> {
        let callback: Callback = Box::new(callback);
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(Dispatch::Callback(callback)).map_err(|e| match e.0 {
                Dispatch::Callback(callback) => callback,
                Dispatch::Event(_) => unreachable!("sent a callback"),
            }),
            None => Err(callback),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Stop accepting work, drain what is queued and join the thread.
    ///
    /// Aborts the process if the thread does not finish within `grace`.
    pub fn dispose(&self, grace: Duration) {
        let Some(sender) = self.sender.lock().take() else {
            return;
        };
        drop(sender);
        if thread::current().id() == self.thread {
            // Disposed from a listener or callback: the loop ends on its own.
            debug!("event pump disposed from its own thread");
            return;
        }

        let deadline = Instant::now() + grace;
        while !self.is_terminated() {
            if Instant::now() >= deadline {
                fail_fast(&format!("event thread did not stop within {grace:?}"));
            }
            thread::sleep(Duration::from_millis(1));
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        debug!("event pump disposed");
    }
}

impl Drop for EventPump {
    fn drop(&mut self) {
        self.dispose(Duration::from_secs(10));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn subscribers_receive_published_events() {
        let pump = EventPump::start().unwrap();
        let rx = pump.subscribe();
        pump.publish(MachineEvent::Disposed);
        pump.publish(MachineEvent::LaundryLoaded { id: Uuid::nil() });

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), MachineEvent::Disposed);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            MachineEvent::LaundryLoaded { id: Uuid::nil() }
        );
    }

    #[test]
    fn callbacks_run_on_the_event_thread() {
        let pump = EventPump::start().unwrap();
        let (tx, rx) = mpsc::channel();
        pump.post(move || {
            tx.send(thread::current().name().map(str::to_string)).unwrap();
        })
        .ok()
        .unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap().as_deref(),
            Some("laundry-events")
        );
    }

    #[test]
    fn panicking_listener_does_not_kill_the_thread() {
        let pump = EventPump::start().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        pump.add_listener(|_| panic!("bad listener"));
        {
            let seen = Arc::clone(&seen);
            pump.add_listener(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }
        pump.publish(MachineEvent::Disposed);
        pump.publish(MachineEvent::Disposed);
        pump.dispose(Duration::from_secs(1));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listener_may_subscribe_while_an_event_is_delivered() {
        let pump = Arc::new(EventPump::start().unwrap());
        let late = Arc::new(Mutex::new(None));
        {
            let weak = Arc::downgrade(&pump);
            let late = Arc::clone(&late);
            pump.add_listener(move |_| {
                let Some(pump) = weak.upgrade() else {
                    return;
                };
                let mut slot = late.lock();
                if slot.is_none() {
                    *slot = Some(pump.subscribe());
                }
            });
        }
        pump.publish(MachineEvent::Disposed);

        let (tx, rx) = mpsc::channel();
        pump.post(move || tx.send(()).unwrap()).ok().unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());

        let subscribed = late.lock().take().unwrap();
        pump.publish(MachineEvent::LaundryLoaded { id: Uuid::nil() });
        assert_eq!(
            subscribed.recv_timeout(Duration::from_secs(1)).unwrap(),
            MachineEvent::LaundryLoaded { id: Uuid::nil() }
        );
        pump.dispose(Duration::from_secs(1));
    }

    #[test]
    fn disposed_pump_rejects_callbacks() {
        let pump = EventPump::start().unwrap();
        pump.dispose(Duration::from_secs(1));
        assert!(pump.is_terminated());
        assert!(pump.post(|| {}).is_err());
        // Publishing after disposal is a silent no-op.
        pump.publish(MachineEvent::Disposed);
    }
}
