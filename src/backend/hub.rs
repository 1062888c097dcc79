//! Session snapshot and phase-event fan-out.

use crate::session::{PhaseEvent, Session};
use crate::vault::Operation;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct HubState {
    session: Session,
    subscribers: Vec<Sender<PhaseEvent>>,
}

/// Shared between the session worker, which publishes, and any number of
/// readers, which never have to go through the queue.
#[derive(Default)]
pub(crate) struct SessionHub {
    state: Mutex<HubState>,
}

impl SessionHub {
    fn state(&self) -> MutexGuard<'_, HubState> {
        // A panicking job is caught by the worker; the snapshot stays usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> Session {
        self.state().session.clone()
    }

    pub fn subscribe(&self) -> Receiver<PhaseEvent> {
        let (tx, rx) = mpsc::channel();
        self.state().subscribers.push(tx);
        rx
    }

    /// Store the latest session and notify every live subscriber.
    pub fn publish(&self, session: &Session, operation: Operation) {
        let event = session.event(operation);
        let mut state = self.state();
        state.session = session.clone();
        state
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}
