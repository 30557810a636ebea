//! Streams of one call session
//!
//! The group owns every [`Stream`] of a session, the services they share and
//! the collaborators they reach (listener, participant resolver, mixers).
//! Streams are stored in slots: while a stream is being driven the group
//! takes it out of its slot and hands itself to the stream, so the stream
//! can look its siblings up and mutate shared state without aliasing.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use infra_common::LogContext;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Level};

use crate::alert::{AlertConfig, AlertContext, AlertEvent};
use crate::clock::{Clock, SystemClock};
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::events::{EngineEventSender, EventInbox};
use crate::media_core::MediaCore;
use crate::mixer::MixerProvider;
use crate::offer_answer::OfferAnswerContext;
use crate::registry::CallRegistration;
use crate::session::{ParticipantResolver, SessionListener, SessionMediaState};
use crate::stream::{AudioStream, RenderContext, RenderOutcome, StopReason, Stream, StreamCore, VideoStream};
use crate::transport::PortConfig;
use crate::types::{CallId, CallState, MediaType, StreamIndex, StreamKey, VideoContent};

/// Every stream of one call session
pub struct StreamsGroup {
    call: CallId,
    registration: CallRegistration,
    media: Arc<MediaCore>,
    config: Arc<StreamConfig>,
    alert_config: Arc<AlertConfig>,
    clock: Arc<dyn Clock>,
    streams: Vec<Option<Box<dyn Stream>>>,
    main_streams: HashMap<MediaType, StreamIndex>,
    shared_services: HashMap<TypeId, Box<dyn Any + Send>>,
    session_state: CallState,
    media_state: SessionMediaState,
    inbox: EventInbox,
    alert_tx: mpsc::UnboundedSender<AlertEvent>,
    alert_rx: Option<mpsc::UnboundedReceiver<AlertEvent>>,
    listener: Option<Arc<dyn SessionListener>>,
    resolver: Option<Arc<dyn ParticipantResolver>>,
    mixer_provider: Option<Arc<dyn MixerProvider>>,
}

impl StreamsGroup {
    /// Create an empty group for a call and register the call
    pub fn new(call: CallId, media: Arc<MediaCore>, config: Arc<StreamConfig>) -> Self {
        let registration = media.calls().register(call);
        let (alert_tx, alert_rx) = mpsc::unbounded_channel();
        Self {
            call,
            registration,
            media,
            config,
            alert_config: Arc::new(AlertConfig::default()),
            clock: Arc::new(SystemClock),
            streams: Vec::new(),
            main_streams: HashMap::new(),
            shared_services: HashMap::new(),
            session_state: CallState::Idle,
            media_state: SessionMediaState::default(),
            inbox: EventInbox::new(),
            alert_tx,
            alert_rx: Some(alert_rx),
            listener: None,
            resolver: None,
            mixer_provider: None,
        }
    }

    /// Use another clock, before streams are added
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use other alert settings, before streams are added
    pub fn with_alert_config(mut self, config: AlertConfig) -> Self {
        self.alert_config = Arc::new(config);
        self
    }

    pub fn call_id(&self) -> CallId {
        self.call
    }

    pub fn registration(&self) -> &CallRegistration {
        &self.registration
    }

    pub fn media_core(&self) -> &Arc<MediaCore> {
        &self.media
    }

    pub fn config(&self) -> &Arc<StreamConfig> {
        &self.config
    }

    pub fn set_config(&mut self, config: Arc<StreamConfig>) {
        self.config = config;
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn listener(&self) -> Option<&Arc<dyn SessionListener>> {
        self.listener.as_ref()
    }

    pub fn set_listener(&mut self, listener: Option<Arc<dyn SessionListener>>) {
        self.listener = listener;
    }

    pub fn resolver(&self) -> Option<&Arc<dyn ParticipantResolver>> {
        self.resolver.as_ref()
    }

    pub fn set_resolver(&mut self, resolver: Option<Arc<dyn ParticipantResolver>>) {
        self.resolver = resolver;
    }

    pub fn mixer_provider(&self) -> Option<&Arc<dyn MixerProvider>> {
        self.mixer_provider.as_ref()
    }

    /// Attach the group to a conference mixer, or detach it
    pub fn set_mixer_provider(&mut self, provider: Option<Arc<dyn MixerProvider>>) {
        self.mixer_provider = provider;
    }

    /// State of the owning call session
    pub fn current_session_state(&self) -> CallState {
        self.session_state
    }

    pub fn set_session_state(&mut self, state: CallState) {
        self.session_state = state;
    }

    pub fn media_state(&self) -> &SessionMediaState {
        &self.media_state
    }

    pub fn media_state_mut(&mut self) -> &mut SessionMediaState {
        &mut self.media_state
    }

    /// Handle for the media engine to post events
    pub fn event_sender(&self) -> EngineEventSender {
        self.inbox.sender()
    }

    /// Take the receiving end of the alert events, once
    pub fn take_alert_events(&mut self) -> Option<mpsc::UnboundedReceiver<AlertEvent>> {
        self.alert_rx.take()
    }

    /// Context handed to the alert monitors of a stream
    pub fn alert_context(&self) -> AlertContext {
        AlertContext::new(
            self.call,
            self.clock.clone(),
            self.alert_config.clone(),
            self.alert_tx.clone(),
        )
    }

    /// Install a shared service; does nothing when one is already there
    pub fn install_shared_service<T: Any + Send + Default>(&mut self) {
        self.shared_services
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()));
    }

    pub fn shared_service<T: Any + Send>(&self) -> Option<&T> {
        self.shared_services
            .get(&TypeId::of::<T>())
            .and_then(|s| s.downcast_ref::<T>())
    }

    pub fn shared_service_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.shared_services
            .get_mut(&TypeId::of::<T>())
            .and_then(|s| s.downcast_mut::<T>())
    }

    /// Create a stream for the local description of `ctx`
    ///
    /// The first non-thumbnail stream of each media type becomes the main one.
    pub fn add_stream(&mut self, ctx: &OfferAnswerContext) -> Result<StreamIndex> {
        let index = ctx.stream_index;
        let media_type = ctx.local.media_type;
        if matches!(self.streams.get(index), Some(Some(_))) {
            warn!("Stream {} already exists in call {}", index, self.call);
            return Ok(index);
        }
        let key = StreamKey { call: self.call, index };
        let ports = if ctx.local.rtp_port > 0 && ctx.local.rtcp_port > 0 {
            PortConfig {
                rtp_port: ctx.local.rtp_port,
                rtcp_port: ctx.local.rtcp_port,
            }
        } else {
            self.media.ports().allocate_pair(&key.to_string())?
        };
        let core = StreamCore::new(key, media_type, ports, self.alert_context());

        let stream: Box<dyn Stream> = match media_type {
            MediaType::Audio => Box::new(AudioStream::new(core)),
            MediaType::Video => Box::new(VideoStream::new(core, self)),
            MediaType::Text => {
                self.media.ports().release(&key.to_string());
                error!("Text streams are not handled by the media layer");
                return Err(StreamError::Unsupported(media_type));
            }
        };

        if self.streams.len() <= index {
            self.streams.resize_with(index + 1, || None);
        }
        self.streams[index] = Some(stream);
        let is_thumbnail = ctx.local.video_content() == VideoContent::Thumbnail;
        if !is_thumbnail && !self.main_streams.contains_key(&media_type) {
            self.main_streams.insert(media_type, index);
        }
        info!(
            "Added {} stream {} to call {} on ports {}/{}",
            media_type, index, self.call, ports.rtp_port, ports.rtcp_port
        );
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.streams.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stream(&self, index: StreamIndex) -> Option<&dyn Stream> {
        self.streams.get(index)?.as_deref()
    }

    pub fn stream_mut(&mut self, index: StreamIndex) -> Option<&mut (dyn Stream + 'static)> {
        self.streams.get_mut(index)?.as_deref_mut()
    }

    /// Streams currently in their slot
    pub fn streams(&self) -> impl Iterator<Item = &dyn Stream> + '_ {
        self.streams.iter().filter_map(|s| s.as_deref())
    }

    pub fn main_stream_index(&self, media_type: MediaType) -> Option<StreamIndex> {
        self.main_streams.get(&media_type).copied()
    }

    pub fn set_main_stream(&mut self, media_type: MediaType, index: StreamIndex) {
        self.main_streams.insert(media_type, index);
    }

    pub fn is_main_stream(&self, index: StreamIndex) -> bool {
        self.main_streams.values().any(|i| *i == index)
    }

    pub fn lookup_main_stream(&self, media_type: MediaType) -> Option<&dyn Stream> {
        self.stream(self.main_stream_index(media_type)?)
    }

    /// Main stream of a media type, as its concrete type
    pub fn lookup_main_stream_as<T: Stream>(&self, media_type: MediaType) -> Option<&T> {
        self.lookup_main_stream(media_type)?.as_any().downcast_ref::<T>()
    }

    pub fn lookup_main_stream_as_mut<T: Stream>(&mut self, media_type: MediaType) -> Option<&mut T> {
        let index = self.main_stream_index(media_type)?;
        self.stream_mut(index)?.as_any_mut().downcast_mut::<T>()
    }

    /// First stream of type `T` matching `predicate`
    pub fn lookup_stream<T: Stream, P>(&self, predicate: P) -> Option<&T>
    where
        P: Fn(&T) -> bool,
    {
        self.streams()
            .filter_map(|s| s.as_any().downcast_ref::<T>())
            .find(|s| predicate(*s))
    }

    pub fn lookup_stream_mut<T: Stream, P>(&mut self, predicate: P) -> Option<&mut T>
    where
        P: Fn(&T) -> bool,
    {
        self.streams
            .iter_mut()
            .filter_map(|s| s.as_deref_mut())
            .filter_map(|s| s.as_any_mut().downcast_mut::<T>())
            .find(|s| predicate(&**s))
    }

    pub fn video_stream(&self, index: StreamIndex) -> Option<&VideoStream> {
        self.stream(index)?.as_any().downcast_ref::<VideoStream>()
    }

    pub fn video_stream_mut(&mut self, index: StreamIndex) -> Option<&mut VideoStream> {
        self.stream_mut(index)?.as_any_mut().downcast_mut::<VideoStream>()
    }

    pub fn audio_stream(&self, index: StreamIndex) -> Option<&AudioStream> {
        self.stream(index)?.as_any().downcast_ref::<AudioStream>()
    }

    pub fn audio_stream_mut(&mut self, index: StreamIndex) -> Option<&mut AudioStream> {
        self.stream_mut(index)?.as_any_mut().downcast_mut::<AudioStream>()
    }

    /// Run `f` on a stream taken out of its slot, with the group at hand
    ///
    /// Returns `None` when the slot is empty or holds another stream type.
    pub fn with_stream<T, R, F>(&mut self, index: StreamIndex, f: F) -> Option<R>
    where
        T: Stream,
        F: FnOnce(&mut T, &mut StreamsGroup) -> R,
    {
        let mut stream = self.streams.get_mut(index)?.take()?;
        let result = match stream.as_any_mut().downcast_mut::<T>() {
            Some(concrete) => Some(f(concrete, self)),
            None => None,
        };
        self.streams[index] = Some(stream);
        result
    }

    fn with_dyn_stream<R, F>(&mut self, index: StreamIndex, f: F) -> Option<R>
    where
        F: FnOnce(&mut dyn Stream, &mut StreamsGroup) -> R,
    {
        let mut stream = self.streams.get_mut(index)?.take()?;
        let result = f(stream.as_mut(), self);
        self.streams[index] = Some(stream);
        Some(result)
    }

    fn indices(&self) -> Vec<StreamIndex> {
        self.streams
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .collect()
    }

    /// Warm up every stream; true when all completed synchronously
    pub fn prepare(&mut self) -> bool {
        let mut done = true;
        for index in self.indices() {
            done &= self
                .with_dyn_stream(index, |s, g| s.prepare(g))
                .unwrap_or(true);
        }
        done
    }

    pub fn finish_prepare(&mut self) {
        for stream in self.streams.iter_mut().filter_map(|s| s.as_deref_mut()) {
            stream.finish_prepare();
        }
    }

    /// Render the stream addressed by `ctx`
    pub fn render(&mut self, ctx: &OfferAnswerContext, target_state: CallState) -> RenderOutcome {
        let config = self.config.clone();
        let render_ctx = RenderContext {
            offer_answer: ctx,
            target_state,
            config: &config,
        };
        let log = LogContext::new("streams").with_call(self.call.to_string()).with_stream(ctx.stream_index);
        let rendered = log.in_scope(Level::DEBUG, || {
            self.with_dyn_stream(ctx.stream_index, |s, g| s.render(&render_ctx, g))
        });
        match rendered {
            Some(outcome) => {
                debug!("Stream {} rendered: {:?}", ctx.stream_index, outcome);
                outcome
            }
            None => {
                error!("No stream {} in call {} to render", ctx.stream_index, self.call);
                RenderOutcome::Stopped(StopReason::MissingResultDescription)
            }
        }
    }

    /// Render every stream, in the given order, then record the session state
    pub fn render_all(&mut self, contexts: &[OfferAnswerContext], target_state: CallState) -> Vec<RenderOutcome> {
        let outcomes = contexts
            .iter()
            .map(|ctx| self.render(ctx, target_state))
            .collect();
        self.session_state = target_state;
        outcomes
    }

    pub fn stop(&mut self, index: StreamIndex) -> Result<()> {
        self.with_dyn_stream(index, |s, g| s.stop(g))
            .ok_or(StreamError::StreamNotFound(index))
    }

    pub fn stop_all(&mut self) {
        for index in self.indices() {
            self.with_dyn_stream(index, |s, g| s.stop(g));
        }
    }

    /// Tear every stream down at session end
    pub fn finish(&mut self) {
        for index in self.indices() {
            self.with_dyn_stream(index, |s, g| s.finish(g));
        }
        self.registration.publish_main_video(None);
        info!("Finished streams of call {}", self.call);
    }

    /// Dispatch every pending engine event to its stream
    pub fn process_events(&mut self) -> usize {
        let events = self.inbox.drain();
        let count = events.len();
        for event in events {
            let index = event.stream_index;
            if self
                .with_dyn_stream(index, |s, g| s.handle_event(event.event, g))
                .is_none()
            {
                warn!("Dropping event for unknown stream {} of call {}", index, self.call);
            }
        }
        count
    }

    /// ZRTP got secured on `source`; let the other streams follow
    pub fn zrtp_started(&mut self, source: StreamIndex) {
        for index in self.indices().into_iter().filter(|i| *i != source) {
            self.with_dyn_stream(index, |s, g| s.zrtp_started(g));
        }
    }

    pub fn run_alert_monitors(&mut self) {
        for stream in self.streams.iter_mut().filter_map(|s| s.as_deref_mut()) {
            if stream.core().is_running() {
                stream.run_alert_monitors();
            }
        }
    }

    /// Whether every running stream is encrypted
    pub fn all_streams_encrypted(&self) -> bool {
        let mut running = self.streams().filter(|s| s.core().is_running()).peekable();
        running.peek().is_some() && running.all(|s| s.is_encrypted())
    }
}

impl std::fmt::Debug for StreamsGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamsGroup")
            .field("call", &self.call)
            .field("streams", &self.len())
            .field("main_streams", &self.main_streams)
            .field("session_state", &self.session_state)
            .finish()
    }
}
