//! Display mode and window handle selection for video streams
//!
//! Window handles distributed while screen sharing:
//!
//! | stream                    | window handle      | preview handle      |
//! |---------------------------|--------------------|---------------------|
//! | main, not sharing         | native window      | native preview      |
//! | main, sharing             | none               | native window       |
//! | my thumbnail, sharing     | core preview       | core preview        |

use crate::config::StreamConfig;
use crate::types::{DisplayMode, WindowId};

/// Facts about a stream that decide its display modes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayModeInputs {
    pub is_screen_sharing: bool,
    pub is_me: bool,
    pub is_thumbnail: bool,
    pub has_label: bool,
    pub is_main: bool,
    /// Some participant of the conference shares its screen
    pub conference_screen_sharing: bool,
}

/// Display modes of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayModes {
    pub preview: DisplayMode,
    pub display: DisplayMode,
}

/// Resolve the preview and display modes
///
/// A shared screen is always shown with black bars; other streams use the
/// configured mode of their role.
pub fn resolve_display_modes(inputs: DisplayModeInputs, config: &StreamConfig) -> DisplayModes {
    let preview = if inputs.is_screen_sharing && inputs.is_me && !inputs.is_thumbnail {
        DisplayMode::BlackBars
    } else if inputs.has_label && !inputs.is_main {
        config.other_display_mode
    } else {
        config.main_display_mode
    };

    let display = if (inputs.is_screen_sharing && (inputs.is_me || !inputs.is_thumbnail))
        || (inputs.is_main && inputs.conference_screen_sharing)
    {
        DisplayMode::BlackBars
    } else {
        preview
    };

    DisplayModes { preview, display }
}

/// Which rule picked the window handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowIdSource {
    /// Set explicitly by the application
    Explicit,
    /// Core preview window for my own thumbnail
    CorePreview,
    /// Window of the participant device using the label
    Participant,
    /// Core-wide video window
    Fallback,
}

/// Everything the window handle choice depends on
#[derive(Debug, Clone, Default)]
pub struct WindowIdInputs<'a> {
    pub explicit: Option<WindowId>,
    pub is_me: bool,
    pub is_thumbnail: bool,
    pub label: &'a str,
    /// Whether a participant device was found for the label
    pub device_found: bool,
    pub device_window: Option<WindowId>,
    pub session_window: Option<WindowId>,
    pub core_preview: Option<WindowId>,
    pub core_video_window: Option<WindowId>,
    pub fallback_enabled: bool,
}

/// Window handle picked for a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowIdChoice {
    pub source: WindowIdSource,
    pub window: Option<WindowId>,
}

/// Pick the window handle, first matching rule wins
///
/// Returns `None` when no rule applies.
pub fn choose_window_id(inputs: &WindowIdInputs<'_>) -> Option<WindowIdChoice> {
    if let Some(window) = inputs.explicit {
        return Some(WindowIdChoice {
            source: WindowIdSource::Explicit,
            window: Some(window),
        });
    }
    if inputs.is_me && inputs.is_thumbnail {
        return Some(WindowIdChoice {
            source: WindowIdSource::CorePreview,
            window: inputs.core_preview,
        });
    }
    if !inputs.label.is_empty() {
        let window = if inputs.device_found {
            inputs.device_window
        } else {
            inputs.session_window
        };
        return Some(WindowIdChoice {
            source: WindowIdSource::Participant,
            window,
        });
    }
    if inputs.fallback_enabled {
        if let Some(window) = inputs.core_video_window {
            return Some(WindowIdChoice {
                source: WindowIdSource::Fallback,
                window: Some(window),
            });
        }
    }
    None
}

/// Whether the core preview window goes to this stream
///
/// The main stream of a plain call shows the preview; in a conference only my
/// camera streams do, and my thumbnail once the main stream shares the screen.
pub fn preview_window_assigned(is_me: bool, is_screen_sharing: bool, is_thumbnail: bool, has_label: bool) -> bool {
    if is_me {
        !is_screen_sharing || is_thumbnail
    } else {
        !has_label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_sharing_forces_black_bars() {
        let config = StreamConfig::default();
        let modes = resolve_display_modes(
            DisplayModeInputs {
                is_screen_sharing: true,
                is_me: true,
                ..Default::default()
            },
            &config,
        );
        assert_eq!(modes.preview, DisplayMode::BlackBars);
        assert_eq!(modes.display, DisplayMode::BlackBars);

        let remote_thumbnail = resolve_display_modes(
            DisplayModeInputs {
                is_screen_sharing: true,
                is_thumbnail: true,
                has_label: true,
                ..Default::default()
            },
            &config,
        );
        assert_eq!(remote_thumbnail.display, DisplayMode::OccupyAllSpace);
    }

    #[test]
    fn main_stream_follows_conference_sharing() {
        let config = StreamConfig::default();
        let inputs = DisplayModeInputs {
            is_main: true,
            conference_screen_sharing: true,
            ..Default::default()
        };
        let modes = resolve_display_modes(inputs, &config);
        assert_eq!(modes.preview, DisplayMode::Hybrid);
        assert_eq!(modes.display, DisplayMode::BlackBars);
    }

    #[test]
    fn window_priority_order() {
        let mut inputs = WindowIdInputs {
            explicit: Some(WindowId(1)),
            is_me: true,
            is_thumbnail: true,
            label: "me-cam",
            device_found: true,
            device_window: Some(WindowId(3)),
            core_preview: Some(WindowId(2)),
            core_video_window: Some(WindowId(4)),
            fallback_enabled: true,
            ..Default::default()
        };
        assert_eq!(choose_window_id(&inputs).map(|c| c.source), Some(WindowIdSource::Explicit));
        inputs.explicit = None;
        assert_eq!(choose_window_id(&inputs).and_then(|c| c.window), Some(WindowId(2)));
        inputs.is_me = false;
        assert_eq!(choose_window_id(&inputs).and_then(|c| c.window), Some(WindowId(3)));
        inputs.label = "";
        assert_eq!(choose_window_id(&inputs).map(|c| c.source), Some(WindowIdSource::Fallback));
        inputs.fallback_enabled = false;
        assert!(choose_window_id(&inputs).is_none());
    }

    #[test]
    fn preview_assignment() {
        assert!(preview_window_assigned(false, false, false, false));
        assert!(!preview_window_assigned(false, false, false, true));
        assert!(preview_window_assigned(true, false, false, true));
        assert!(!preview_window_assigned(true, true, false, true));
        assert!(preview_window_assigned(true, true, true, true));
    }
}
