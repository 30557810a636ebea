use parking_lot::Mutex;
use rvoip_stream_core::{CallId, MediaEndpoint, MediaType, StreamKey, StreamMixer, VideoMixerPort};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::MixerParticipant;
use crate::config::{MixerConfig, VideoLayout};

/// Height of the main picture when thumbnails are shown below it
const SPEAKER_HEIGHT: f32 = 0.8;

/// One picture of the composed output, in fractions of the output size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionCell {
    pub participant: MixerParticipant,
    pub label: String,
    /// Stream feeding the cell, none for the local camera
    pub stream: Option<StreamKey>,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub thumbnail: bool,
}

#[derive(Debug, Clone)]
struct VideoEndpoint {
    endpoint: MediaEndpoint,
    thumbnail: bool,
}

#[derive(Debug, Clone)]
struct Source {
    participant: MixerParticipant,
    label: String,
    stream: Option<StreamKey>,
}

#[derive(Debug)]
struct VideoMixerState {
    endpoints: Vec<VideoEndpoint>,
    layout: VideoLayout,
    focus: Option<MixerParticipant>,
    local_label: Option<String>,
}

/// Video conference composer
///
/// Main endpoints feed the mosaic or the speaker picture; thumbnail
/// endpoints feed the small pictures of the active speaker layout.
#[derive(Debug)]
pub struct VideoMixer {
    config: MixerConfig,
    state: Mutex<VideoMixerState>,
}

impl VideoMixer {
    pub fn new(config: MixerConfig) -> Self {
        let layout = config.layout;
        Self {
            config,
            state: Mutex::new(VideoMixerState {
                endpoints: Vec::new(),
                layout,
                focus: None,
                local_label: None,
            }),
        }
    }

    pub fn layout(&self) -> VideoLayout {
        self.state.lock().layout
    }

    pub fn set_layout(&self, layout: VideoLayout) {
        self.state.lock().layout = layout;
    }

    pub fn focus(&self) -> Option<MixerParticipant> {
        self.state.lock().focus
    }

    /// Returns whether the focus moved
    pub fn set_focus(&self, focus: Option<MixerParticipant>) -> bool {
        let mut state = self.state.lock();
        if state.focus == focus {
            return false;
        }
        debug!("Video focus moves to {:?}", focus);
        state.focus = focus;
        true
    }

    pub fn add_local_endpoint(&self, label: &str) {
        self.state.lock().local_label = Some(label.to_string());
    }

    pub fn remove_local_endpoint(&self) -> bool {
        let mut state = self.state.lock();
        if state.focus == Some(MixerParticipant::Local) {
            state.focus = None;
        }
        state.local_label.take().is_some()
    }

    pub fn endpoint_count(&self) -> usize {
        self.state.lock().endpoints.len()
    }

    pub fn thumbnail_count(&self) -> usize {
        self.state.lock().endpoints.iter().filter(|e| e.thumbnail).count()
    }

    pub fn disconnect_call(&self, call: CallId) -> usize {
        let mut state = self.state.lock();
        let before = state.endpoints.len();
        state.endpoints.retain(|e| e.endpoint.stream.call != call);
        if state.focus == Some(MixerParticipant::Call(call)) {
            state.focus = None;
        }
        before - state.endpoints.len()
    }

    /// Pictures of the current output
    pub fn composition(&self) -> Vec<CompositionCell> {
        let state = self.state.lock();
        let mut sources: Vec<Source> = state
            .endpoints
            .iter()
            .filter(|e| !e.thumbnail)
            .map(|e| Source {
                participant: MixerParticipant::Call(e.endpoint.stream.call),
                label: e.endpoint.label.clone(),
                stream: Some(e.endpoint.stream),
            })
            .collect();
        if let Some(label) = state.local_label.as_ref() {
            sources.push(Source {
                participant: MixerParticipant::Local,
                label: label.clone(),
                stream: None,
            });
        }
        match state.layout {
            VideoLayout::Mosaic => self.mosaic(sources),
            VideoLayout::ActiveSpeaker => active_speaker(&state, sources),
        }
    }

    fn mosaic(&self, mut sources: Vec<Source>) -> Vec<CompositionCell> {
        if sources.len() > self.config.max_mosaic_size {
            warn!(
                "{} video sources for a mosaic of {}, extra ones are not shown",
                sources.len(),
                self.config.max_mosaic_size
            );
            sources.truncate(self.config.max_mosaic_size);
        }
        if sources.is_empty() {
            return Vec::new();
        }
        let count = sources.len();
        let columns = (count as f32).sqrt().ceil() as usize;
        let rows = count.div_ceil(columns);
        sources
            .into_iter()
            .enumerate()
            .map(|(i, source)| CompositionCell {
                participant: source.participant,
                label: source.label,
                stream: source.stream,
                x: (i % columns) as f32 / columns as f32,
                y: (i / columns) as f32 / rows as f32,
                width: 1.0 / columns as f32,
                height: 1.0 / rows as f32,
                thumbnail: false,
            })
            .collect()
    }
}

fn active_speaker(state: &VideoMixerState, mut sources: Vec<Source>) -> Vec<CompositionCell> {
    if sources.is_empty() {
        return Vec::new();
    }
    let focus_index = state
        .focus
        .and_then(|focus| sources.iter().position(|s| s.participant == focus))
        .unwrap_or(0);
    let speaker = sources.remove(focus_index);
    let main_height = if sources.is_empty() { 1.0 } else { SPEAKER_HEIGHT };
    let mut cells = vec![CompositionCell {
        participant: speaker.participant,
        label: speaker.label,
        stream: speaker.stream,
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: main_height,
        thumbnail: false,
    }];
    let count = sources.len();
    for (i, source) in sources.into_iter().enumerate() {
        let thumbnail = match source.participant {
            MixerParticipant::Call(call) => state
                .endpoints
                .iter()
                .find(|e| e.thumbnail && e.endpoint.stream.call == call),
            MixerParticipant::Local => None,
        };
        let (label, stream) = match thumbnail {
            Some(e) => (e.endpoint.label.clone(), Some(e.endpoint.stream)),
            None => (source.label, source.stream),
        };
        cells.push(CompositionCell {
            participant: source.participant,
            label,
            stream,
            x: i as f32 / count as f32,
            y: SPEAKER_HEIGHT,
            width: 1.0 / count as f32,
            height: 1.0 - SPEAKER_HEIGHT,
            thumbnail: true,
        });
    }
    cells
}

impl StreamMixer for VideoMixer {
    fn media_type(&self) -> MediaType {
        MediaType::Video
    }

    fn as_video(&self) -> Option<&dyn VideoMixerPort> {
        Some(self)
    }
}

impl VideoMixerPort for VideoMixer {
    fn connect_endpoint(&self, endpoint: MediaEndpoint, thumbnail: bool) -> bool {
        let mut state = self.state.lock();
        if let Some(existing) = state
            .endpoints
            .iter_mut()
            .find(|e| e.endpoint.stream == endpoint.stream)
        {
            debug!("Video endpoint of stream {} reconnected", endpoint.stream);
            existing.endpoint = endpoint;
            existing.thumbnail = thumbnail;
            return true;
        }
        if state.endpoints.len() >= self.config.max_streams {
            error!(
                "Video mixer is full ({} endpoints), stream {} not connected",
                self.config.max_streams, endpoint.stream
            );
            return false;
        }
        debug!(
            "Video endpoint of stream {} connected (thumbnail: {})",
            endpoint.stream, thumbnail
        );
        state.endpoints.push(VideoEndpoint { endpoint, thumbnail });
        true
    }

    fn disconnect_endpoint(&self, endpoint: &MediaEndpoint) {
        let mut state = self.state.lock();
        match state
            .endpoints
            .iter()
            .position(|e| e.endpoint.stream == endpoint.stream)
        {
            Some(index) if state.endpoints[index].endpoint.pipeline == endpoint.pipeline => {
                state.endpoints.remove(index);
            }
            Some(_) => warn!(
                "Video endpoint of stream {} was replaced, keeping the new one",
                endpoint.stream
            ),
            None => debug!("Video endpoint of stream {} already gone", endpoint.stream),
        }
    }
}
