//! Conference and mixer settings read from the `[conference]` section

use infra_common::ConfigStore;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Arrangement of the video mixer output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VideoLayout {
    /// Every participant in a grid
    #[default]
    Mosaic,
    /// The speaker full size, thumbnails of the others
    ActiveSpeaker,
}

impl VideoLayout {
    pub fn from_config(value: &str) -> Self {
        match value {
            "Mosaic" | "mosaic" => VideoLayout::Mosaic,
            "ActiveSpeaker" | "active_speaker" => VideoLayout::ActiveSpeaker,
            other => {
                warn!("Unknown conference layout '{}', using Mosaic", other);
                VideoLayout::Mosaic
            }
        }
    }
}

/// Mixer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixerConfig {
    pub sample_rate: u32,
    /// Samples per channel in one mixing period
    pub samples_per_frame: usize,
    /// Saturate mixed samples instead of letting them wrap
    pub clip_protection: bool,
    /// Endpoints accepted by each mixer, the local one included
    pub max_streams: usize,
    pub layout: VideoLayout,
    /// Cells of the mosaic
    pub max_mosaic_size: usize,
    /// Volume above which an endpoint may become the active speaker, in dBm0
    pub speaker_threshold_dbm0: f32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            samples_per_frame: 320,
            clip_protection: true,
            max_streams: 10,
            layout: VideoLayout::Mosaic,
            max_mosaic_size: 9,
            speaker_threshold_dbm0: -40.0,
        }
    }
}

impl MixerConfig {
    pub fn from_store(store: &ConfigStore) -> Self {
        let d = Self::default();
        Self {
            sample_rate: store.get_int("conference", "sample_rate", d.sample_rate as i64).max(8000) as u32,
            samples_per_frame: positive(store.get_int(
                "conference",
                "samples_per_frame",
                d.samples_per_frame as i64,
            ))
            .unwrap_or(d.samples_per_frame),
            clip_protection: store.get_bool("conference", "clip_protection", d.clip_protection),
            max_streams: positive(store.get_int("conference", "max_streams", d.max_streams as i64))
                .unwrap_or(d.max_streams),
            layout: VideoLayout::from_config(&store.get_string("conference", "layout", "Mosaic")),
            max_mosaic_size: positive(store.get_int(
                "conference",
                "max_mosaic_size",
                d.max_mosaic_size as i64,
            ))
            .unwrap_or(d.max_mosaic_size),
            speaker_threshold_dbm0: store.get_float(
                "conference",
                "speaker_threshold",
                d.speaker_threshold_dbm0,
            ),
        }
    }
}

/// Settings of a conference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConferenceConfig {
    pub subject: String,
    /// Zero means no limit
    pub max_participants: usize,
    pub video_enabled: bool,
    /// Whether the local user is part of the conference it hosts
    pub local_participant_enabled: bool,
    /// Offer video when (re)joining a conference that had video
    pub automatically_initiate_video: bool,
    pub mixer: MixerConfig,
}

impl Default for ConferenceConfig {
    fn default() -> Self {
        Self {
            subject: String::new(),
            max_participants: 0,
            video_enabled: true,
            local_participant_enabled: true,
            automatically_initiate_video: false,
            mixer: MixerConfig::default(),
        }
    }
}

impl ConferenceConfig {
    pub fn from_store(store: &ConfigStore) -> Self {
        let d = Self::default();
        Self {
            subject: store.get_string("conference", "subject", &d.subject),
            max_participants: store.get_int("conference", "max_participants", 0).max(0) as usize,
            video_enabled: store.get_bool("conference", "video_enabled", d.video_enabled),
            local_participant_enabled: store.get_bool(
                "conference",
                "local_participant_enabled",
                d.local_participant_enabled,
            ),
            automatically_initiate_video: store.get_bool(
                "video",
                "automatically_initiate",
                d.automatically_initiate_video,
            ),
            mixer: MixerConfig::from_store(store),
        }
    }

    /// Copy with another subject
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }
}

fn positive(value: i64) -> Option<usize> {
    (value > 0).then_some(value as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_section_gives_defaults() {
        assert_eq!(ConferenceConfig::from_store(&ConfigStore::new()), ConferenceConfig::default());
    }

    #[test]
    fn values_are_read_and_sanitized() {
        let store = ConfigStore::from_toml_str(
            r#"
            [conference]
            subject = "Weekly"
            max_participants = 4
            layout = "ActiveSpeaker"
            max_streams = -3
            clip_protection = false

            [video]
            automatically_initiate = true
            "#,
        )
        .unwrap();
        let config = ConferenceConfig::from_store(&store);
        assert_eq!(config.subject, "Weekly");
        assert_eq!(config.max_participants, 4);
        assert!(config.automatically_initiate_video);
        assert_eq!(config.mixer.layout, VideoLayout::ActiveSpeaker);
        assert_eq!(config.mixer.max_streams, 10);
        assert!(!config.mixer.clip_protection);
    }
}
