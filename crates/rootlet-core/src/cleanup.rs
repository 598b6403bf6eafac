//! Reverse-order rollback stack executed on every exit path.
//!
//! The registry accumulates teardown actions (unmounts, file removals)
//! across the session and fires them in reverse-registration order exactly
//! once, whether the session returns normally, fails, or is interrupted.
//! Under background execution, ownership transfers to the detached process
//! and the foreground copy is disarmed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rootlet_common::error::{Result, RootletError, EXIT_FAILURE};

type Action = Box<dyn FnOnce() + Send>;

/// Ordered stack of teardown actions for one session.
#[derive(Default)]
pub struct CleanupRegistry {
    actions: Vec<(String, Action)>,
    disarmed: bool,
    spent: bool,
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("actions", &self.actions.len())
            .field("disarmed", &self.disarmed)
            .field("spent", &self.spent)
            .finish()
    }
}

impl CleanupRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a teardown action. The label is used only for logging.
    pub fn register(&mut self, label: impl Into<String>, action: impl FnOnce() + Send + 'static) {
        self.actions.push((label.into(), Box::new(action)));
    }

    /// Pops the most recently registered action without running it.
    /// Returns whether an action was removed.
    pub fn unregister_last(&mut self) -> bool {
        self.actions.pop().is_some()
    }

    /// Number of pending actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether no actions are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Transfers teardown responsibility away from this process. A
    /// disarmed registry never runs its actions.
    pub fn disarm(&mut self) {
        self.disarmed = true;
    }

    /// Runs all pending actions in reverse-registration order, exactly
    /// once. A second invocation, or any invocation after [`Self::disarm`],
    /// is a no-op.
    pub fn run_all(&mut self) {
        if self.spent || self.disarmed {
            return;
        }
        self.spent = true;
        while let Some((label, action)) = self.actions.pop() {
            tracing::debug!(%label, "running cleanup action");
            action();
        }
    }
}

/// Thread-shared registry handle, cloneable into the interruption handler
/// and into mount-orchestrator unmount registration.
pub type SharedRegistry = Arc<Mutex<CleanupRegistry>>;

/// Creates an empty shared registry.
#[must_use]
pub fn shared() -> SharedRegistry {
    Arc::new(Mutex::new(CleanupRegistry::new()))
}

static TEARING_DOWN: AtomicBool = AtomicBool::new(false);

/// Runs all actions of a shared registry, suppressing re-entry from the
/// interruption handler while teardown executes.
pub fn run_shared(registry: &SharedRegistry) {
    TEARING_DOWN.store(true, Ordering::SeqCst);
    registry
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .run_all();
    TEARING_DOWN.store(false, Ordering::SeqCst);
}

/// Installs the SIGINT/SIGTERM handler for the session's duration.
///
/// Interruption triggers the registry once, then terminates the process.
/// Signals arriving while teardown is already executing are suppressed so
/// a half-unmounted guest is never left behind.
///
/// # Errors
///
/// Returns an error if the handler cannot be installed.
pub fn install_interrupt_handler(registry: &SharedRegistry) -> Result<()> {
    let registry = Arc::clone(registry);
    ctrlc::set_handler(move || {
        if TEARING_DOWN.load(Ordering::SeqCst) {
            tracing::warn!("teardown in progress, ignoring interrupt");
            return;
        }
        tracing::warn!("interrupted, unwinding mounts");
        run_shared(&registry);
        std::process::exit(EXIT_FAILURE);
    })
    .map_err(|e| RootletError::Signal {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn recording_registry() -> (CleanupRegistry, Arc<Mutex<Vec<&'static str>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CleanupRegistry::new();
        for name in ["A", "B", "C"] {
            let log = Arc::clone(&log);
            registry.register(name, move || log.lock().unwrap().push(name));
        }
        (registry, log)
    }

    #[test]
    fn actions_run_in_reverse_order() {
        let (mut registry, log) = recording_registry();
        registry.run_all();
        assert_eq!(*log.lock().unwrap(), vec!["C", "B", "A"]);
    }

    #[test]
    fn second_run_is_a_no_op() {
        let (mut registry, log) = recording_registry();
        registry.run_all();
        registry.run_all();
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[test]
    fn unregister_last_drops_most_recent() {
        let (mut registry, log) = recording_registry();
        assert!(registry.unregister_last());
        registry.run_all();
        assert_eq!(*log.lock().unwrap(), vec!["B", "A"]);
    }

    #[test]
    fn disarmed_registry_never_fires() {
        let (mut registry, log) = recording_registry();
        registry.disarm();
        registry.run_all();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn unregister_on_empty_returns_false() {
        let mut registry = CleanupRegistry::new();
        assert!(!registry.unregister_last());
    }
}
