//! Registry of in-flight delivery handlers, keyed by report id

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::sender::Stoppable;

struct Entry {
    ticket: u64,
    /// Empty while the run that reserved the slot is still generating
    handler: Option<Arc<dyn Stoppable>>,
    stop_requested: bool,
}

#[derive(Default)]
struct Entries {
    next_ticket: u64,
    handlers: HashMap<String, Entry>,
}

/// Ticket identifying one registration; removal only succeeds with the
/// ticket of the registration that is still current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration(u64);

/// At most one entry exists per report id. A run reserves its slot before
/// generating and attaches the handler once the send is dispatched.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: Mutex<Entries>,
    idle: Notify,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot of a report. Returns `None` while another run holds it.
    pub fn try_reserve(&self, report_id: &str) -> Option<Registration> {
        let mut entries = self.lock();
        if entries.handlers.contains_key(report_id) {
            return None;
        }
        entries.next_ticket += 1;
        let ticket = entries.next_ticket;
        entries.handlers.insert(
            report_id.to_string(),
            Entry {
                ticket,
                handler: None,
                stop_requested: false,
            },
        );
        drop(entries);

        debug!(report_id, "Reserved delivery slot");
        Some(Registration(ticket))
    }

    /// Reserve a slot and attach `handler` to it in one step
    pub fn register(&self, report_id: &str, handler: Arc<dyn Stoppable>) -> Option<Registration> {
        let registration = self.try_reserve(report_id)?;
        self.attach(report_id, registration, handler)
            .then_some(registration)
    }

    /// Fill a reserved slot. Fails when the reservation is no longer current.
    /// A stop that arrived while the slot was reserved is forwarded at once.
    pub fn attach(
        &self,
        report_id: &str,
        registration: Registration,
        handler: Arc<dyn Stoppable>,
    ) -> bool {
        let mut entries = self.lock();
        let Some(entry) = entries
            .handlers
            .get_mut(report_id)
            .filter(|entry| entry.ticket == registration.0)
        else {
            drop(entries);
            warn!(report_id, "Delivery slot no longer reserved, handler not attached");
            return false;
        };
        entry.handler = Some(Arc::clone(&handler));
        let stop_requested = entry.stop_requested;
        drop(entries);

        if stop_requested {
            handler.stop();
        }
        debug!(report_id, "Registered delivery handler");
        true
    }

    /// Drop a registration. Removing one that is already gone is a no-op.
    pub fn remove(&self, report_id: &str, registration: Registration) -> bool {
        let mut entries = self.lock();
        let current = entries
            .handlers
            .get(report_id)
            .is_some_and(|entry| entry.ticket == registration.0);
        if current {
            entries.handlers.remove(report_id);
        }
        let idle = entries.handlers.is_empty();
        drop(entries);

        if idle {
            self.idle.notify_waiters();
        }
        current
    }

    pub fn contains(&self, report_id: &str) -> bool {
        self.lock().handlers.contains_key(report_id)
    }

    /// Ask every registered handler to stop, including the ones whose run is
    /// still generating. Handlers deregister themselves once their outcome
    /// has run.
    pub fn stop_all(&self) -> usize {
        let mut entries = self.lock();
        let count = entries.handlers.len();
        let handlers: Vec<Arc<dyn Stoppable>> = entries
            .handlers
            .values_mut()
            .filter_map(|entry| {
                entry.stop_requested = true;
                entry.handler.clone()
            })
            .collect();
        drop(entries);

        for handler in &handlers {
            handler.stop();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve once no handler is registered
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

/// Reservation held by a run until its handler takes over. Dropping it
/// without [`Reservation::attach`] releases the slot.
pub struct Reservation<'a> {
    registry: &'a HandlerRegistry,
    report_id: String,
    registration: Option<Registration>,
}

impl<'a> Reservation<'a> {
    pub fn acquire(registry: &'a HandlerRegistry, report_id: &str) -> Option<Self> {
        let registration = registry.try_reserve(report_id)?;
        Some(Self {
            registry,
            report_id: report_id.to_string(),
            registration: Some(registration),
        })
    }

    pub fn registration(&self) -> Option<Registration> {
        self.registration
    }

    /// Hand the slot over to `handler`; from now on the handler releases it
    pub fn attach(mut self, handler: Arc<dyn Stoppable>) -> bool {
        match self.registration.take() {
            Some(registration) => self.registry.attach(&self.report_id, registration, handler),
            None => false,
        }
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            self.registry.remove(&self.report_id, registration);
            debug!(report_id = %self.report_id, "Released delivery slot");
        }
    }
}
