//! Configuration snapshot injected into stream rendering
//!
//! Streams never read the configuration store themselves: the owner builds a
//! [`StreamConfig`] once and passes it to every render.

use infra_common::ConfigStore;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::types::{DisplayMode, VideoDefinition};

/// Media settings read by streams while rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub main_display_mode: DisplayMode,
    pub other_display_mode: DisplayMode,
    /// Upper bound of the sent size while in a conference
    pub max_conference_size: Option<VideoDefinition>,
    pub preferred_video_size: Option<VideoDefinition>,
    pub preview_size: Option<VideoDefinition>,
    /// Zero lets the engine pick
    pub preferred_fps: f32,
    pub fallback_to_dummy_codec: bool,
    pub freeze_on_error: bool,
    pub display_filter_auto_rotate: bool,
    pub display_filter: Option<String>,
    pub nowebcam_uses_normal_fps: bool,
    pub rtp_io: bool,
    pub video_preset: Option<String>,
    pub reuse_preview_source: bool,
    pub capture: bool,
    pub display: bool,
    pub self_view: bool,
    pub use_preview_window: bool,
    pub window_id_fallback: bool,
    pub retransmission_on_nack: bool,
    pub zrtp_go_clear: bool,
    pub real_early_media: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            main_display_mode: DisplayMode::Hybrid,
            other_display_mode: DisplayMode::OccupyAllSpace,
            max_conference_size: None,
            preferred_video_size: None,
            preview_size: None,
            preferred_fps: 0.0,
            fallback_to_dummy_codec: true,
            freeze_on_error: true,
            display_filter_auto_rotate: false,
            display_filter: None,
            nowebcam_uses_normal_fps: false,
            rtp_io: false,
            video_preset: None,
            reuse_preview_source: false,
            capture: true,
            display: true,
            self_view: true,
            use_preview_window: false,
            window_id_fallback: true,
            retransmission_on_nack: false,
            zrtp_go_clear: false,
            real_early_media: false,
        }
    }
}

impl StreamConfig {
    /// Build the snapshot from the `[video]` and `[sip]` sections
    pub fn from_store(store: &ConfigStore) -> Self {
        let d = Self::default();
        Self {
            main_display_mode: DisplayMode::from_config(&store.get_string(
                "video",
                "main_display_mode",
                "Hybrid",
            )),
            other_display_mode: DisplayMode::from_config(&store.get_string(
                "video",
                "other_display_mode",
                "OccupyAllSpace",
            )),
            max_conference_size: definition(store, "max_conference_size"),
            preferred_video_size: definition(store, "size"),
            preview_size: definition(store, "preview_size"),
            preferred_fps: store.get_float("video", "framerate", d.preferred_fps),
            fallback_to_dummy_codec: store.get_bool(
                "video",
                "fallback_to_dummy_codec",
                d.fallback_to_dummy_codec,
            ),
            freeze_on_error: store.get_bool("video", "freeze_on_error", d.freeze_on_error),
            display_filter_auto_rotate: store.get_bool(
                "video",
                "display_filter_auto_rotate",
                d.display_filter_auto_rotate,
            ),
            display_filter: store.get_opt_string("video", "displaytype"),
            nowebcam_uses_normal_fps: store.get_bool(
                "video",
                "nowebcam_uses_normal_fps",
                d.nowebcam_uses_normal_fps,
            ),
            rtp_io: store.get_bool("video", "rtp_io", d.rtp_io),
            video_preset: store.get_opt_string("video", "preset"),
            reuse_preview_source: store.get_bool("video", "reuse_source", d.reuse_preview_source),
            capture: store.get_bool("video", "capture", d.capture),
            display: store.get_bool("video", "display", d.display),
            self_view: store.get_bool("video", "self_view", d.self_view),
            use_preview_window: store.get_bool("video", "use_preview_window", d.use_preview_window),
            window_id_fallback: store.get_bool("video", "fallback_window_id", d.window_id_fallback),
            retransmission_on_nack: store.get_bool(
                "video",
                "retransmission_on_nack",
                d.retransmission_on_nack,
            ),
            zrtp_go_clear: store.get_bool("sip", "zrtp_go_clear", d.zrtp_go_clear),
            real_early_media: store.get_bool("sip", "real_early_media", d.real_early_media),
        }
    }
}

fn definition(store: &ConfigStore, key: &str) -> Option<VideoDefinition> {
    let name = store.get_opt_string("video", key)?;
    let found = VideoDefinition::by_name(&name);
    if found.is_none() {
        error!("Video definition '{}' set in video.{} is not supported", name, key);
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VideoSize;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_store_gives_defaults() {
        assert_eq!(StreamConfig::from_store(&ConfigStore::new()), StreamConfig::default());
    }

    #[test]
    fn reads_video_section() {
        let store = ConfigStore::from_toml_str(
            r#"
[video]
main_display_mode = "OccupyAllSpace"
other_display_mode = "Sideways"
max_conference_size = "vga"
size = "nope"
framerate = 15
reuse_source = true

[sip]
zrtp_go_clear = 1
"#,
        )
        .unwrap();
        let config = StreamConfig::from_store(&store);
        assert_eq!(config.main_display_mode, DisplayMode::OccupyAllSpace);
        assert_eq!(config.other_display_mode, DisplayMode::Hybrid);
        assert_eq!(
            config.max_conference_size.map(|d| d.size),
            Some(VideoSize::new(640, 480))
        );
        assert_eq!(config.preferred_video_size, None);
        assert_eq!(config.preferred_fps, 15.0);
        assert!(config.reuse_preview_source);
        assert!(config.zrtp_go_clear);
    }
}
