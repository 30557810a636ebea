//! Screen sharing state shared by the video streams of one call

use tracing::info;

/// Tracks whether this call currently shares its screen
///
/// Installed once per [`StreamsGroup`](crate::group::StreamsGroup); the main
/// and thumbnail streams both consult it so only a real change triggers the
/// stop and replumb sequence.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScreenSharingService {
    local_screen_sharing: bool,
}

impl ScreenSharingService {
    /// Create a new service with sharing off
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the state, returning whether it changed
    pub fn update_local_screen_sharing(&mut self, enabled: bool) -> bool {
        if self.local_screen_sharing == enabled {
            return false;
        }
        info!("Local screen sharing {}", if enabled { "enabled" } else { "disabled" });
        self.local_screen_sharing = enabled;
        true
    }

    pub fn local_screen_sharing_enabled(&self) -> bool {
        self.local_screen_sharing
    }
}
