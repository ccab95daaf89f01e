//! Commit notifier and background pump
//!
//! Each writable path has one notifier. A commit on any handle wakes the
//! pump thread, which runs the coordinator's async query cycle and then
//! notifies every registered handle. Wake-ups that arrive while a cycle is
//! running are coalesced into the next one.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::coordinator::Coordinator;
use crate::handle::{HandleId, StoreHandle};
use crate::observability::{event_enabled, log_event, log_event_with_fields, metrics, Event};

enum PumpMessage {
    CommitNotification,
    Shutdown,
}

type HandleMap = Arc<Mutex<HashMap<HandleId, Weak<StoreHandle>>>>;

/// Wakes the pump of one coordinator
pub struct CommitNotifier {
    sender: Sender<PumpMessage>,
    handles: HandleMap,
    pump: Option<JoinHandle<()>>,
}

impl CommitNotifier {
    /// Start the pump thread for `coordinator`
    pub fn start(coordinator: Weak<Coordinator>) -> io::Result<Self> {
        let (sender, receiver) = channel::unbounded();
        let handles: HandleMap = Arc::new(Mutex::new(HashMap::new()));

        let pump = thread::Builder::new()
            .name("aerodb-commit-pump".to_string())
            .spawn(move || run_pump(receiver, coordinator))?;

        Ok(Self {
            sender,
            handles,
            pump: Some(pump),
        })
    }

    pub fn add_handle(&self, handle: &Arc<StoreHandle>) {
        self.handles.lock().insert(handle.id(), Arc::downgrade(handle));
    }

    pub fn remove_handle(&self, id: HandleId) {
        self.handles.lock().remove(&id);
    }

    /// Live registered handles
    pub fn registered_handles(&self) -> Vec<Arc<StoreHandle>> {
        let mut handles = self.handles.lock();
        handles.retain(|_, weak| weak.strong_count() > 0);
        handles.values().filter_map(Weak::upgrade).collect()
    }

    /// Announce a commit; the pump picks it up asynchronously
    pub fn notify_others(&self) {
        metrics().increment_commit_notifications();
        if event_enabled(Event::CommitNotified) {
            let registered = self.handles.lock().len().to_string();
            log_event_with_fields(Event::CommitNotified, &[("handles", registered.as_str())]);
        }
        // The pump only stops when this notifier is dropped
        let _ = self.sender.send(PumpMessage::CommitNotification);
    }
}

impl Drop for CommitNotifier {
    fn drop(&mut self) {
        let _ = self.sender.send(PumpMessage::Shutdown);
        if let Some(pump) = self.pump.take() {
            // The last coordinator reference can be released by the pump itself
            if pump.thread().id() != thread::current().id() {
                let _ = pump.join();
            }
        }
    }
}

fn run_pump(receiver: Receiver<PumpMessage>, coordinator: Weak<Coordinator>) {
    log_event(Event::PumpStarted);

    while let Ok(PumpMessage::CommitNotification) = receiver.recv() {
        let mut shutdown = false;
        while let Ok(message) = receiver.try_recv() {
            if let PumpMessage::Shutdown = message {
                shutdown = true;
            }
        }
        if shutdown {
            break;
        }

        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        coordinator.run_async_queries();
        coordinator.notify_all_handles();
    }

    log_event(Event::PumpStopped);
}
