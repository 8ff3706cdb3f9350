//! Shared observable state types.

/// Sync state published by the orchestrator to every client surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncState {
    /// The backend is unreachable
    #[default]
    Offline,
    Syncing,
    Synced,
    /// The last cycle failed for a reason other than connectivity
    Error,
}

impl SyncState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}
