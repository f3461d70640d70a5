/// Peer sync lifecycle state machine.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed; producers may already enqueue messages.
    Created,

    /// The dispatch loop is running.
    Started,

    /// Shutdown requested. Terminal: producers become no-ops and the dispatch
    /// loop drains its inbox and exits.
    Shutdown,
}

impl Lifecycle {
    /// Check if a transition to the target state is valid.
    pub fn can_transition_to(&self, target: Lifecycle) -> bool {
        match self {
            Lifecycle::Created => matches!(target, Lifecycle::Started | Lifecycle::Shutdown),
            Lifecycle::Started => matches!(target, Lifecycle::Shutdown),
            Lifecycle::Shutdown => false,
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Lifecycle::Created
    }
}
