//! Service states of a `WalletKit`.
//!
//! `Idle -> Starting -> Running -> Stopping -> Terminated`, with `Failed`
//! reachable from `Starting`. `Terminated` and `Failed` are final.

use std::fmt;

/// Lifecycle of a `WalletKit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    Idle,
    Starting,
    Running,
    Stopping,
    Terminated,
    Failed,
}

impl ServiceState {
    /// No further transitions happen from a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Terminated | ServiceState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Idle => "idle",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Terminated => "terminated",
            ServiceState::Failed => "failed",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
