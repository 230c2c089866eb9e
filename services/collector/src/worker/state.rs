//! DeviceWorker lifecycle state machine.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Initializing,
    Connecting,
    Running,
    Reconnecting,
    DeviceOffline,
    Stopping,
    Stopped,
    /// Terminal: reached only for configuration errors that no amount of
    /// retrying will fix.
    Error,
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Running)
    }
}
