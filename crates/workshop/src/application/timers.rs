//! Phase timers as abortable tasks.
//!
//! Each timer sleeps on its own task and reports back through the event
//! channel. Aborting covers the common case; the epoch carried by every
//! [`Timer`] covers the race where a timer fired just before being aborted.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use rift_domain::{Timer, WorkshopEvent};

use super::events::RuntimeEvent;

#[derive(Debug, Default)]
pub struct TimerSet {
    handles: Vec<JoinHandle<()>>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, timer: Timer, after: Duration, events: mpsc::Sender<RuntimeEvent>) {
        self.handles.retain(|handle| !handle.is_finished());
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let event = RuntimeEvent::Workshop(WorkshopEvent::TimerElapsed(timer));
            if events.send(event).await.is_err() {
                tracing::debug!(timer = timer.name, "Timer fired after the runtime stopped");
            }
        });
        self.handles.push(handle);
    }

    pub fn cancel_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }

    /// Timers that have not fired yet.
    pub fn pending(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
