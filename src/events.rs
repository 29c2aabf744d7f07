use crate::dispatch::UiDispatcher;
use crate::ink::StrokeSet;
use crate::session::PresentationInfo;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Normalized notifications for UI-facing collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentationEvent {
    ConnectionChanged(bool),
    SlideShowStateChanged(bool),
    PresentationOpened {
        info: PresentationInfo,
        /// Persisted position to offer resuming at.
        resume_slide: Option<u32>,
    },
    PresentationClosed,
    SlideShowBegan { slide: u32, ink: StrokeSet },
    SlideChanged { slide: u32, ink: StrokeSet },
    SlideShowEnded,
}

impl PresentationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PresentationEvent::ConnectionChanged(_) => "connection_changed",
            PresentationEvent::SlideShowStateChanged(_) => "slide_show_state_changed",
            PresentationEvent::PresentationOpened { .. } => "presentation_opened",
            PresentationEvent::PresentationClosed => "presentation_closed",
            PresentationEvent::SlideShowBegan { .. } => "slide_show_began",
            PresentationEvent::SlideChanged { .. } => "slide_changed",
            PresentationEvent::SlideShowEnded => "slide_show_ended",
        }
    }
}

pub type Listener = Arc<dyn Fn(&PresentationEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Fan-out of presentation events onto the UI dispatcher. A failing listener
/// never prevents the others from running.
pub struct EventBus {
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
    dispatcher: Arc<dyn UiDispatcher>,
    timeout: Duration,
}

impl EventBus {
    pub fn new(dispatcher: Arc<dyn UiDispatcher>, timeout: Duration) -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            dispatcher,
            timeout,
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&PresentationEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn publish(&self, event: PresentationEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        if listeners.is_empty() {
            return;
        }
        let kind = event.kind();
        tracing::debug!(event = kind, listeners = listeners.len(), "publishing presentation event");
        let job = Box::new(move || {
            for listener in listeners {
                if panic::catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                    tracing::error!(event = event.kind(), "presentation event listener panicked");
                }
            }
        });
        if let Err(err) = self.dispatcher.dispatch(job, self.timeout) {
            tracing::warn!(event = kind, %err, "presentation event delivery did not complete");
        }
    }

    pub fn publish_all(&self, events: Vec<PresentationEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}
