//! Notifications from the read loop to whoever is presenting the data.
//!
//! The read loop never waits on its subscriber: events go into an unbounded
//! channel and the loop moves on. A subscriber that falls behind can use
//! [`SessionEvents::next_update`] to fold everything that piled up into a
//! single [`Update`] and render once.

use crate::sample::Sample;

use std::{
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
    time::Duration,
};

/// Something that happened in the read loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The device and log are open and samples are being read.
    Started,
    /// A sample was appended to the log and flushed.
    SampleAppended(Sample),
    /// A read or write failed; the loop carries on.
    TransientError(String),
    /// The loop has exited and released the device and log.
    Stopped,
}

/// A burst of events folded together.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Update {
    /// How many samples were appended.
    pub appended: usize,
    /// The newest of those samples.
    pub latest: Option<Sample>,
    /// Messages of any transient errors.
    pub errors: Vec<String>,
    /// Whether the session started during the burst.
    pub started: bool,
    /// Whether the session stopped during the burst. No more events follow.
    pub stopped: bool,
}

impl Update {
    fn absorb(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Started => self.started = true,
            SessionEvent::SampleAppended(sample) => {
                self.appended += 1;
                self.latest = Some(sample);
            }
            SessionEvent::TransientError(message) => self.errors.push(message),
            SessionEvent::Stopped => self.stopped = true,
        }
    }

    /// Whether any samples arrived.
    pub fn has_new_samples(&self) -> bool {
        self.appended > 0
    }
}

/// The sending half, held by the read loop.
#[derive(Debug, Clone)]
pub(crate) struct EventSender {
    tx: Sender<SessionEvent>,
}

impl EventSender {
    /// Fire and forget. A subscriber that hung up is not our problem.
    pub(crate) fn send(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}

/// The receiving half, handed to the subscriber.
#[derive(Debug)]
pub struct SessionEvents {
    rx: Receiver<SessionEvent>,
}

pub(crate) fn channel() -> (EventSender, SessionEvents) {
    let (tx, rx) = mpsc::channel();
    (EventSender { tx }, SessionEvents { rx })
}

impl SessionEvents {
    /// Waits up to `timeout` for the next event, without coalescing.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<SessionEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Every event already waiting, without blocking.
    pub fn try_iter(&self) -> impl Iterator<Item = SessionEvent> + '_ {
        self.rx.try_iter()
    }

    /// Waits up to `timeout` for something to happen, then drains everything
    /// else that is already waiting into the same [`Update`].
    ///
    /// Returns `None` if nothing happened in time, or if the session is gone
    /// and every event has been seen.
    pub fn next_update(&self, timeout: Duration) -> Option<Update> {
        let first = match self.rx.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return None,
        };

        let mut update = Update::default();
        update.absorb(first);
        loop {
            match self.rx.try_recv() {
                Ok(event) => update.absorb(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Some(update)
    }
}
