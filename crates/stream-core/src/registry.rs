//! Id-keyed registry of live calls
//!
//! Entities referring to a call without owning it (alerts, video sources
//! forwarding another call) keep its [`CallId`] and resolve it here. The
//! registry only holds weak references: once the owning group drops its
//! [`CallRegistration`], lookups fail.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::engine::PipelineId;
use crate::types::CallId;

/// Registry entry of one call
#[derive(Debug)]
pub struct CallEntry {
    id: CallId,
    main_video: RwLock<Option<PipelineId>>,
}

impl CallEntry {
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Publish the pipeline of the main video stream (None when stopped)
    pub fn publish_main_video(&self, pipeline: Option<PipelineId>) {
        *self.main_video.write() = pipeline;
    }

    pub fn main_video(&self) -> Option<PipelineId> {
        *self.main_video.read()
    }
}

/// Strong handle keeping a call registered
pub type CallRegistration = Arc<CallEntry>;

/// Registry of live calls
#[derive(Debug, Default)]
pub struct CallRegistry {
    calls: DashMap<CallId, Weak<CallEntry>>,
}

impl CallRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call; it stays resolvable while the handle lives
    pub fn register(&self, id: CallId) -> CallRegistration {
        let entry = Arc::new(CallEntry {
            id,
            main_video: RwLock::new(None),
        });
        self.calls.insert(id, Arc::downgrade(&entry));
        debug!("Registered call {}", id);
        entry
    }

    /// Resolve a call id
    pub fn get(&self, id: &CallId) -> Option<Arc<CallEntry>> {
        let entry = self.calls.get(id)?.upgrade();
        if entry.is_none() {
            self.calls.remove(id);
        }
        entry
    }

    pub fn is_alive(&self, id: &CallId) -> bool {
        self.get(id).is_some()
    }

    /// Running main video pipeline of a call
    pub fn main_video_pipeline(&self, id: &CallId) -> Option<PipelineId> {
        self.get(id).and_then(|entry| entry.main_video())
    }

    /// Number of registered calls still alive
    pub fn len(&self) -> usize {
        self.calls.retain(|_, weak| weak.strong_count() > 0);
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
