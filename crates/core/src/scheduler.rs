//! Cancelable timers for the two sync loops.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use {futures::future::BoxFuture, tokio::task::JoinHandle, tracing::debug};

/// The independent periodic loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncLoop {
    /// Catalog, core script and cached catalog plugins.
    Core,
    /// User scripts carrying `updateURL`/`downloadURL`.
    External,
}

impl SyncLoop {
    fn index(self) -> usize {
        match self {
            Self::Core => 0,
            Self::External => 1,
        }
    }
}

#[derive(Default)]
struct Slot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// At most one pending timer per loop.
///
/// Scheduling or cancelling a loop aborts whatever was pending for it. A
/// timer that fires detaches itself before running its tick, so the tick is
/// free to cancel and re-arm its own loop.
#[derive(Clone, Default)]
pub struct Scheduler {
    slots: Arc<Mutex<[Slot; 2]>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, which: SyncLoop) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = &mut slots[which.index()];
        slot.generation = slot.generation.wrapping_add(1);
        if let Some(handle) = slot.handle.take() {
            debug!(?which, "cancelled pending sync timer");
            handle.abort();
        }
    }

    pub fn cancel_all(&self) {
        self.cancel(SyncLoop::Core);
        self.cancel(SyncLoop::External);
    }

    /// Run `tick` after `delay`, replacing any pending timer for `which`.
    pub fn schedule(&self, which: SyncLoop, delay: Duration, tick: BoxFuture<'static, ()>) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = &mut slots[which.index()];
        slot.generation = slot.generation.wrapping_add(1);
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }

        let generation = slot.generation;
        let shared = Arc::clone(&self.slots);
        debug!(?which, delay_secs = delay.as_secs(), "scheduled sync timer");
        slot.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !detach(&shared, which, generation) {
                return;
            }
            tick.await;
        }));
    }

    pub fn is_scheduled(&self, which: SyncLoop) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots[which.index()]
            .handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

/// Drop the handle of a timer that has fired, unless it was superseded.
fn detach(slots: &Mutex<[Slot; 2]>, which: SyncLoop, generation: u64) -> bool {
    let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
    let slot = &mut slots[which.index()];
    if slot.generation != generation {
        return false;
    }
    slot.handle = None;
    true
}
