use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rvoip_stream_core::engine::PipelineId;
use rvoip_stream_core::{AudioMixerPort, CallId, MediaEndpoint, MediaType, StreamMixer, VOLUME_UNKNOWN_DBM0};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::EndpointId;
use crate::config::MixerConfig;
use crate::error::{ConferenceError, Result};

/// Level of a full-scale signal, in dBm0
const FULL_SCALE_DBM0: f64 = 3.14;

#[derive(Debug)]
struct AudioEndpoint {
    id: EndpointId,
    label: String,
    pipeline: Option<PipelineId>,
    muted: bool,
    frame: Option<Vec<i16>>,
    volume_dbm0: f32,
}

impl AudioEndpoint {
    fn new(id: EndpointId, label: String, pipeline: Option<PipelineId>, muted: bool) -> Self {
        Self {
            id,
            label,
            pipeline,
            muted,
            frame: None,
            volume_dbm0: VOLUME_UNKNOWN_DBM0,
        }
    }

    fn contributes(&self) -> bool {
        !self.muted && self.frame.is_some()
    }
}

/// Recording of the conference mix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
    /// Mixing periods written so far
    pub frames: u64,
}

/// Mix sent back to one endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct MixedFrame {
    pub endpoint: EndpointId,
    pub samples: Vec<i16>,
}

/// Result of one mixing period
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MixOutput {
    pub frames: Vec<MixedFrame>,
    pub active_speaker: Option<EndpointId>,
    pub speaker_changed: bool,
}

#[derive(Debug, Default)]
struct AudioMixerState {
    endpoints: Vec<AudioEndpoint>,
    recording: Option<Recording>,
    active_speaker: Option<EndpointId>,
}

impl AudioMixerState {
    fn find_mut(&mut self, id: EndpointId) -> Option<&mut AudioEndpoint> {
        self.endpoints.iter_mut().find(|e| e.id == id)
    }
}

/// Mix-minus audio conference bridge
///
/// Every endpoint receives the sum of all the other unmuted endpoints of the
/// period. Frames are pushed by the media engine between two calls to
/// [`AudioMixer::mix`].
#[derive(Debug)]
pub struct AudioMixer {
    config: MixerConfig,
    state: Mutex<AudioMixerState>,
}

impl AudioMixer {
    pub fn new(config: MixerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(AudioMixerState::default()),
        }
    }

    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    pub fn add_local_endpoint(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.endpoints.iter().any(|e| e.id == EndpointId::Local) {
            return Err(ConferenceError::AlreadyIn);
        }
        if state.endpoints.len() >= self.config.max_streams {
            return Err(ConferenceError::ConferenceFull {
                max: self.config.max_streams,
            });
        }
        state
            .endpoints
            .push(AudioEndpoint::new(EndpointId::Local, String::new(), None, false));
        Ok(())
    }

    pub fn remove_local_endpoint(&self) -> bool {
        self.remove(EndpointId::Local)
    }

    pub fn has_local_endpoint(&self) -> bool {
        self.contains(EndpointId::Local)
    }

    pub fn contains(&self, id: EndpointId) -> bool {
        self.state.lock().endpoints.iter().any(|e| e.id == id)
    }

    pub fn endpoint_count(&self) -> usize {
        self.state.lock().endpoints.len()
    }

    pub fn endpoints(&self) -> Vec<EndpointId> {
        self.state.lock().endpoints.iter().map(|e| e.id).collect()
    }

    /// Endpoint currently using stream `label`
    pub fn endpoint_by_label(&self, label: &str) -> Option<EndpointId> {
        self.state
            .lock()
            .endpoints
            .iter()
            .find(|e| !label.is_empty() && e.label == label)
            .map(|e| e.id)
    }

    fn remove(&self, id: EndpointId) -> bool {
        let mut state = self.state.lock();
        let before = state.endpoints.len();
        state.endpoints.retain(|e| e.id != id);
        if state.active_speaker == Some(id) {
            state.active_speaker = None;
        }
        state.endpoints.len() != before
    }

    /// Remove the endpoints of every stream of `call`
    pub fn disconnect_call(&self, call: CallId) -> usize {
        let mut state = self.state.lock();
        let before = state.endpoints.len();
        state
            .endpoints
            .retain(|e| !matches!(e.id, EndpointId::Stream(key) if key.call == call));
        if matches!(state.active_speaker, Some(EndpointId::Stream(key)) if key.call == call) {
            state.active_speaker = None;
        }
        before - state.endpoints.len()
    }

    pub fn set_muted(&self, id: EndpointId, muted: bool) -> bool {
        match self.state.lock().find_mut(id) {
            Some(endpoint) => {
                endpoint.muted = muted;
                true
            }
            None => false,
        }
    }

    pub fn is_muted(&self, id: EndpointId) -> Option<bool> {
        self.state
            .lock()
            .endpoints
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.muted)
    }

    /// Queue the samples captured by `id` for the next period
    ///
    /// Frames are cut or zero-padded to the period size.
    pub fn push_frame(&self, id: EndpointId, samples: &[i16]) -> bool {
        let size = self.config.samples_per_frame;
        let mut state = self.state.lock();
        let Some(endpoint) = state.find_mut(id) else {
            debug!("Dropping audio frame of unknown endpoint {:?}", id);
            return false;
        };
        let mut frame = samples[..samples.len().min(size)].to_vec();
        frame.resize(size, 0);
        endpoint.volume_dbm0 = volume_dbm0(&frame);
        endpoint.frame = Some(frame);
        true
    }

    /// Last measured volume of `id`, in dBm0
    pub fn volume(&self, id: EndpointId) -> f32 {
        self.state
            .lock()
            .endpoints
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.volume_dbm0)
            .unwrap_or(VOLUME_UNKNOWN_DBM0)
    }

    pub fn active_speaker(&self) -> Option<EndpointId> {
        self.state.lock().active_speaker
    }

    /// Mix the queued frames and elect the active speaker
    pub fn mix(&self) -> MixOutput {
        let size = self.config.samples_per_frame;
        let mut state = self.state.lock();

        let mut total = vec![0i32; size];
        for endpoint in state.endpoints.iter().filter(|e| e.contributes()) {
            if let Some(frame) = endpoint.frame.as_ref() {
                for (sum, sample) in total.iter_mut().zip(frame) {
                    *sum += *sample as i32;
                }
            }
        }

        let frames = state
            .endpoints
            .iter()
            .map(|endpoint| {
                let own = endpoint.frame.as_ref().filter(|_| endpoint.contributes());
                let samples = total
                    .iter()
                    .enumerate()
                    .map(|(i, sum)| {
                        let minus = own.map(|f| f[i] as i32).unwrap_or(0);
                        self.to_sample(sum - minus)
                    })
                    .collect();
                MixedFrame {
                    endpoint: endpoint.id,
                    samples,
                }
            })
            .collect();

        let threshold = self.config.speaker_threshold_dbm0;
        let loudest = state
            .endpoints
            .iter()
            .filter(|e| e.contributes() && e.volume_dbm0 > threshold)
            .max_by(|a, b| a.volume_dbm0.total_cmp(&b.volume_dbm0))
            .map(|e| e.id);
        let mut speaker_changed = false;
        if let Some(speaker) = loudest {
            if state.active_speaker != Some(speaker) {
                debug!("Active speaker is now {:?}", speaker);
                state.active_speaker = Some(speaker);
                speaker_changed = true;
            }
        }

        if let Some(recording) = state.recording.as_mut() {
            recording.frames += 1;
        }
        for endpoint in state.endpoints.iter_mut() {
            endpoint.frame = None;
        }

        MixOutput {
            frames,
            active_speaker: state.active_speaker,
            speaker_changed,
        }
    }

    fn to_sample(&self, value: i32) -> i16 {
        if self.config.clip_protection {
            value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
        } else {
            value as i16
        }
    }

    pub fn start_recording(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(current) = state.recording.as_ref() {
            return Err(ConferenceError::Recording(format!(
                "already recording to {}",
                current.path.display()
            )));
        }
        info!("Recording conference to {}", path.display());
        state.recording = Some(Recording {
            path: path.to_path_buf(),
            started_at: Utc::now(),
            frames: 0,
        });
        Ok(())
    }

    pub fn stop_recording(&self) -> Result<Recording> {
        let recording = self
            .state
            .lock()
            .recording
            .take()
            .ok_or_else(|| ConferenceError::Recording("not recording".to_string()))?;
        info!(
            "Stopped recording to {} after {} frames",
            recording.path.display(),
            recording.frames
        );
        Ok(recording)
    }

    pub fn is_recording(&self) -> bool {
        self.state.lock().recording.is_some()
    }
}

impl StreamMixer for AudioMixer {
    fn media_type(&self) -> MediaType {
        MediaType::Audio
    }

    fn as_audio(&self) -> Option<&dyn AudioMixerPort> {
        Some(self)
    }
}

impl AudioMixerPort for AudioMixer {
    fn connect_endpoint(&self, endpoint: MediaEndpoint, muted: bool) -> bool {
        let id = EndpointId::Stream(endpoint.stream);
        let mut state = self.state.lock();
        if let Some(existing) = state.find_mut(id) {
            debug!("Audio endpoint of stream {} reconnected", endpoint.stream);
            existing.pipeline = Some(endpoint.pipeline);
            existing.label = endpoint.label;
            existing.muted = muted;
            return true;
        }
        if state.endpoints.len() >= self.config.max_streams {
            error!(
                "Audio mixer is full ({} endpoints), stream {} not connected",
                self.config.max_streams, endpoint.stream
            );
            return false;
        }
        debug!("Audio endpoint of stream {} connected", endpoint.stream);
        state
            .endpoints
            .push(AudioEndpoint::new(id, endpoint.label, Some(endpoint.pipeline), muted));
        true
    }

    fn disconnect_endpoint(&self, endpoint: &MediaEndpoint) {
        let id = EndpointId::Stream(endpoint.stream);
        let mut state = self.state.lock();
        match state.endpoints.iter().position(|e| e.id == id) {
            Some(index) if state.endpoints[index].pipeline == Some(endpoint.pipeline) => {
                state.endpoints.remove(index);
                if state.active_speaker == Some(id) {
                    state.active_speaker = None;
                }
            }
            Some(_) => warn!(
                "Audio endpoint of stream {} was replaced, keeping the new one",
                endpoint.stream
            ),
            None => debug!("Audio endpoint of stream {} already gone", endpoint.stream),
        }
    }
}

/// RMS level of a frame in dBm0, floored at the unknown volume
fn volume_dbm0(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return VOLUME_UNKNOWN_DBM0;
    }
    let energy = samples.iter().map(|s| (*s as f64).powi(2)).sum::<f64>() / samples.len() as f64;
    if energy <= 0.0 {
        return VOLUME_UNKNOWN_DBM0;
    }
    let level = 10.0 * (energy / (32768.0 * 32768.0)).log10() + FULL_SCALE_DBM0;
    (level as f32).max(VOLUME_UNKNOWN_DBM0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvoip_stream_core::StreamKey;

    fn config(samples: usize) -> MixerConfig {
        MixerConfig {
            samples_per_frame: samples,
            max_streams: 3,
            ..MixerConfig::default()
        }
    }

    fn endpoint(call: CallId, pipeline: u64) -> MediaEndpoint {
        MediaEndpoint {
            stream: StreamKey { call, index: 0 },
            pipeline: PipelineId(pipeline),
            content: Default::default(),
            label: format!("a{}", pipeline),
        }
    }

    fn frame_of(output: &MixOutput, id: EndpointId) -> Vec<i16> {
        output
            .frames
            .iter()
            .find(|f| f.endpoint == id)
            .map(|f| f.samples.clone())
            .unwrap()
    }

    #[test]
    fn each_endpoint_hears_the_others() {
        let mixer = AudioMixer::new(config(4));
        let (alice, bob) = (endpoint(CallId::new(), 1), endpoint(CallId::new(), 2));
        mixer.connect_endpoint(alice.clone(), false);
        mixer.connect_endpoint(bob.clone(), false);
        mixer.add_local_endpoint().unwrap();
        let a = EndpointId::Stream(alice.stream);
        let b = EndpointId::Stream(bob.stream);

        mixer.push_frame(a, &[100, 100, 100, 100]);
        mixer.push_frame(b, &[10, 20, 30, 40]);
        mixer.push_frame(EndpointId::Local, &[1, 1]);
        let output = mixer.mix();

        assert_eq!(frame_of(&output, a), vec![11, 21, 30, 40]);
        assert_eq!(frame_of(&output, b), vec![101, 101, 100, 100]);
        assert_eq!(frame_of(&output, EndpointId::Local), vec![110, 120, 130, 140]);
    }

    #[test]
    fn muted_endpoints_are_left_out_of_the_mix() {
        let mixer = AudioMixer::new(config(2));
        let alice = endpoint(CallId::new(), 1);
        mixer.connect_endpoint(alice.clone(), true);
        mixer.add_local_endpoint().unwrap();
        let a = EndpointId::Stream(alice.stream);

        mixer.push_frame(a, &[500, 500]);
        mixer.push_frame(EndpointId::Local, &[7, 7]);
        let output = mixer.mix();
        assert_eq!(frame_of(&output, EndpointId::Local), vec![0, 0]);
        assert_eq!(frame_of(&output, a), vec![7, 7]);

        assert!(mixer.set_muted(a, false));
        mixer.push_frame(a, &[500, 500]);
        assert_eq!(frame_of(&mixer.mix(), EndpointId::Local), vec![500, 500]);
    }

    #[test]
    fn clip_protection_saturates() {
        let mixer = AudioMixer::new(config(1));
        let (x, y) = (endpoint(CallId::new(), 1), endpoint(CallId::new(), 2));
        mixer.connect_endpoint(x.clone(), false);
        mixer.connect_endpoint(y.clone(), false);
        mixer.add_local_endpoint().unwrap();
        mixer.push_frame(EndpointId::Stream(x.stream), &[30000]);
        mixer.push_frame(EndpointId::Stream(y.stream), &[30000]);
        assert_eq!(frame_of(&mixer.mix(), EndpointId::Local), vec![i16::MAX]);
    }

    #[test]
    fn loudest_endpoint_becomes_speaker() {
        let mixer = AudioMixer::new(config(160));
        let (alice, bob) = (endpoint(CallId::new(), 1), endpoint(CallId::new(), 2));
        mixer.connect_endpoint(alice.clone(), false);
        mixer.connect_endpoint(bob.clone(), false);
        let a = EndpointId::Stream(alice.stream);
        let b = EndpointId::Stream(bob.stream);
        assert_eq!(mixer.volume(a), VOLUME_UNKNOWN_DBM0);

        mixer.push_frame(a, &[100; 160]);
        mixer.push_frame(b, &[10000; 160]);
        let output = mixer.mix();
        assert_eq!(output.active_speaker, Some(b));
        assert!(output.speaker_changed);
        assert!(mixer.volume(b) > -10.0);
        assert!(mixer.volume(a) < -40.0);

        // silence keeps the last speaker
        let output = mixer.mix();
        assert_eq!(output.active_speaker, Some(b));
        assert!(!output.speaker_changed);
    }

    #[test]
    fn capacity_and_stale_disconnects() {
        let mixer = AudioMixer::new(config(1));
        let call = CallId::new();
        let first = endpoint(call, 1);
        mixer.connect_endpoint(first.clone(), false);
        let mut restarted = first.clone();
        restarted.pipeline = PipelineId(9);
        mixer.connect_endpoint(restarted.clone(), false);
        assert_eq!(mixer.endpoint_count(), 1);

        mixer.disconnect_endpoint(&first);
        assert_eq!(mixer.endpoint_count(), 1);

        assert!(mixer.connect_endpoint(endpoint(CallId::new(), 2), false));
        assert!(mixer.connect_endpoint(endpoint(CallId::new(), 3), false));
        assert!(!mixer.connect_endpoint(endpoint(CallId::new(), 4), false));
        assert_eq!(mixer.endpoint_count(), 3);
        assert!(matches!(
            mixer.add_local_endpoint(),
            Err(ConferenceError::ConferenceFull { max: 3 })
        ));

        assert_eq!(mixer.disconnect_call(call), 1);
        mixer.disconnect_endpoint(&restarted);
        assert_eq!(mixer.endpoint_count(), 2);
    }

    #[test]
    fn recording_counts_periods() {
        let mixer = AudioMixer::new(config(1));
        assert!(mixer.stop_recording().is_err());
        mixer.start_recording(Path::new("/tmp/conf.wav")).unwrap();
        assert!(mixer.start_recording(Path::new("/tmp/other.wav")).is_err());
        mixer.mix();
        mixer.mix();
        let recording = mixer.stop_recording().unwrap();
        assert_eq!(recording.frames, 2);
        assert!(!mixer.is_recording());
    }
}
