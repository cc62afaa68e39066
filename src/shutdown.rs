use stream_cancel::{Trigger, Tripwire};

/// Coordinates the begin-shutdown broadcast from the orchestrator to
/// the TCP server and every worker. Each of them holds a tripwire
/// clone that resolves once global shutdown has begun.
pub struct ShutdownCoordinator {
    trigger: Trigger,
    tripwire: Tripwire,
}

impl ShutdownCoordinator {
    pub fn new() -> ShutdownCoordinator {
        let (trigger, tripwire) = Tripwire::new();
        ShutdownCoordinator { trigger, tripwire }
    }

    /// A signal that resolves when global shutdown begins.
    pub fn begin_shutdown(&self) -> Tripwire {
        self.tripwire.clone()
    }

    /// Begins global shutdown: every outstanding tripwire resolves.
    pub fn shutdown(self) {
        self.trigger.cancel();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
