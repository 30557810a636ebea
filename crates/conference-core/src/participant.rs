//! Participants of a conference and their devices

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rvoip_stream_core::{CallId, DeviceInfo, MediaType, StreamDirection, WindowId};
use serde::{Deserialize, Serialize};

use crate::types::{DeviceState, ParticipantAddress};

/// One device (one call) of a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantDevice {
    pub address: ParticipantAddress,
    pub name: Option<String>,
    /// Call carrying the device media, if any on this side
    pub call: Option<CallId>,
    pub state: DeviceState,
    /// Stream label per media type
    pub labels: HashMap<MediaType, String>,
    pub ssrcs: HashMap<MediaType, u32>,
    pub directions: HashMap<MediaType, StreamDirection>,
    pub is_screen_sharing: bool,
    pub window_id: Option<WindowId>,
    pub joined_at: DateTime<Utc>,
}

impl ParticipantDevice {
    pub fn new(address: ParticipantAddress, call: Option<CallId>) -> Self {
        Self {
            address,
            name: None,
            call,
            state: DeviceState::Joining,
            labels: HashMap::new(),
            ssrcs: HashMap::new(),
            directions: HashMap::new(),
            is_screen_sharing: false,
            window_id: None,
            joined_at: Utc::now(),
        }
    }

    pub fn label(&self, media_type: MediaType) -> Option<&str> {
        self.labels.get(&media_type).map(String::as_str).filter(|l| !l.is_empty())
    }

    pub fn set_label(&mut self, media_type: MediaType, label: impl Into<String>) {
        self.labels.insert(media_type, label.into());
    }

    pub fn has_label(&self, media_type: MediaType, label: &str) -> bool {
        !label.is_empty() && self.label(media_type) == Some(label)
    }

    pub fn ssrc(&self, media_type: MediaType) -> Option<u32> {
        self.ssrcs.get(&media_type).copied()
    }

    /// Direction of `media_type`, inactive when not negotiated
    pub fn direction(&self, media_type: MediaType) -> StreamDirection {
        self.directions
            .get(&media_type)
            .copied()
            .unwrap_or(StreamDirection::Inactive)
    }

    /// Record a direction, returning whether it changed
    pub fn set_direction(&mut self, media_type: MediaType, direction: StreamDirection) -> bool {
        self.directions.insert(media_type, direction) != Some(direction)
    }

    /// View handed to streams while rendering
    pub fn info(&self, media_type: MediaType) -> DeviceInfo {
        DeviceInfo {
            label: self.label(media_type).unwrap_or_default().to_string(),
            is_screen_sharing: self.is_screen_sharing,
            window_id: self.window_id,
        }
    }
}

/// A conference participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub address: ParticipantAddress,
    pub is_admin: bool,
    pub devices: Vec<ParticipantDevice>,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(address: ParticipantAddress) -> Self {
        Self {
            address,
            is_admin: false,
            devices: Vec::new(),
            joined_at: Utc::now(),
        }
    }

    pub fn find_device(&self, address: &ParticipantAddress) -> Option<&ParticipantDevice> {
        self.devices.iter().find(|d| d.address == *address)
    }

    pub fn find_device_mut(&mut self, address: &ParticipantAddress) -> Option<&mut ParticipantDevice> {
        self.devices.iter_mut().find(|d| d.address == *address)
    }

    pub fn device_by_call(&self, call: CallId) -> Option<&ParticipantDevice> {
        self.devices.iter().find(|d| d.call == Some(call))
    }

    pub fn device_by_label(&self, media_type: MediaType, label: &str) -> Option<&ParticipantDevice> {
        self.devices.iter().find(|d| d.has_label(media_type, label))
    }

    pub fn device_by_ssrc(&self, media_type: MediaType, ssrc: u32) -> Option<&ParticipantDevice> {
        self.devices.iter().find(|d| d.ssrc(media_type) == Some(ssrc))
    }

    /// Remove the device using `address`
    pub fn remove_device(&mut self, address: &ParticipantAddress) -> Option<ParticipantDevice> {
        let position = self.devices.iter().position(|d| d.address == *address)?;
        Some(self.devices.remove(position))
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.devices.iter().any(|d| d.is_screen_sharing)
    }
}
