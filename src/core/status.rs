use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Stage of the navigation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NavigationPhase {
    Idle = 0,
    Authorizing = 1,
    Loading = 2,
    Transitioning = 3,
    Error = 4,
}

impl NavigationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            NavigationPhase::Idle => "idle",
            NavigationPhase::Authorizing => "authorizing",
            NavigationPhase::Loading => "loading",
            NavigationPhase::Transitioning => "transitioning",
            NavigationPhase::Error => "error",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => NavigationPhase::Authorizing,
            2 => NavigationPhase::Loading,
            3 => NavigationPhase::Transitioning,
            4 => NavigationPhase::Error,
            _ => NavigationPhase::Idle,
        }
    }
}

/// In-flight flag guarding the navigation pipeline.
///
/// At most one pipeline run holds the flag; a run that cannot acquire it is
/// dropped by the caller rather than queued.
#[derive(Debug, Default)]
pub struct NavigationStatus {
    in_flight: AtomicBool,
    phase: AtomicU8,
}

impl NavigationStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the in-flight flag, or `None` when a navigation is running.
    pub fn try_begin(&self) -> Option<NavigationGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| {
                self.set_phase(NavigationPhase::Authorizing);
                NavigationGuard { status: self }
            })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> NavigationPhase {
        NavigationPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    fn set_phase(&self, phase: NavigationPhase) {
        let previous = self.phase.swap(phase as u8, Ordering::SeqCst);
        log::debug!(
            "Navigation phase {} -> {}",
            NavigationPhase::from_u8(previous).as_str(),
            phase.as_str()
        );
    }

    /// Reset the flag (useful after destroy and for testing)
    pub fn reset(&self) {
        self.phase.store(NavigationPhase::Idle as u8, Ordering::SeqCst);
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Held for the duration of one pipeline run; releases the flag on drop.
#[derive(Debug)]
pub struct NavigationGuard<'a> {
    status: &'a NavigationStatus,
}

impl NavigationGuard<'_> {
    pub fn advance(&self, phase: NavigationPhase) {
        self.status.set_phase(phase);
    }

    pub fn phase(&self) -> NavigationPhase {
        self.status.phase()
    }
}

impl Drop for NavigationGuard<'_> {
    fn drop(&mut self) {
        self.status.reset();
    }
}
