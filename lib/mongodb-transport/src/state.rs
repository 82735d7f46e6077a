use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

/// Lifecycle state of a transport.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum RunningState {
    /// Not connected. Events are dropped.
    Stopped = 0,

    /// Acquiring a connection. Events are dropped.
    Starting = 1,

    /// Connected. Events are inserted.
    Started = 2,

    /// Releasing the connection. Events are dropped.
    Stopping = 3,

    /// The last start or reconfiguration failed. Events are dropped until the transport is started again.
    Error = 4,
}

impl RunningState {
    /// Returns `true` if the transport is started, or in the middle of starting.
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Starting | Self::Started)
    }

    /// Returns the name of this state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Stopping => "STOPPING",
            Self::Error => "ERROR",
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Stopped,
            1 => Self::Starting,
            2 => Self::Started,
            3 => Self::Stopping,
            _ => Self::Error,
        }
    }
}

impl fmt::Display for RunningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `RunningState` that can be read without locking.
///
/// Writers are expected to be serialized externally (by the transport's lifecycle lock); readers on the ingest path
/// only ever load.
pub(crate) struct AtomicRunningState(AtomicU8);

impl AtomicRunningState {
    pub const fn new(state: RunningState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> RunningState {
        RunningState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: RunningState) {
        self.0.store(state as u8, Ordering::Release);
    }
}
