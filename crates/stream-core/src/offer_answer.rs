//! Negotiated stream descriptions handed over by the signalling layer

use serde::{Deserialize, Serialize};

use crate::types::{MediaType, MulticastRole, StreamDirection, StreamIndex, VideoContent};

/// An RTP payload type of a description
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadType {
    pub number: u8,
    pub mime_type: String,
    pub clock_rate: u32,
}

impl PayloadType {
    /// Create a new payload type
    pub fn new(number: u8, mime_type: impl Into<String>, clock_rate: u32) -> Self {
        Self {
            number,
            mime_type: mime_type.into(),
            clock_rate,
        }
    }
}

/// Description of one stream line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescription {
    pub media_type: MediaType,
    pub rtp_addr: String,
    pub rtp_port: u16,
    pub rtcp_addr: String,
    pub rtcp_port: u16,
    pub direction: StreamDirection,
    /// `content` attribute, empty when absent
    pub content: String,
    /// `label` attribute, empty when absent
    pub label: String,
    pub payload_types: Vec<PayloadType>,
    pub bandwidth_kbps: Option<u32>,
    pub multicast_role: MulticastRole,
    /// `zrtp-hash` attribute of the chosen configuration
    pub zrtp_hash: Option<String>,
    /// SDES crypto line `(suite, key)` of the chosen configuration
    pub crypto: Option<(String, String)>,
    pub frame_marking_extension_id: u8,
    pub avpf: bool,
}

impl StreamDescription {
    /// Create a new description with no attributes
    pub fn new(media_type: MediaType, rtp_port: u16) -> Self {
        Self {
            media_type,
            rtp_addr: String::new(),
            rtp_port,
            rtcp_addr: String::new(),
            rtcp_port: if rtp_port > 0 { rtp_port + 1 } else { 0 },
            direction: StreamDirection::SendRecv,
            content: String::new(),
            label: String::new(),
            payload_types: Vec::new(),
            bandwidth_kbps: None,
            multicast_role: MulticastRole::None,
            zrtp_hash: None,
            crypto: None,
            frame_marking_extension_id: 0,
            avpf: false,
        }
    }

    pub fn with_direction(mut self, direction: StreamDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_payload(mut self, payload: PayloadType) -> Self {
        self.payload_types.push(payload);
        self
    }

    pub fn with_address(mut self, addr: impl Into<String>) -> Self {
        let addr = addr.into();
        self.rtcp_addr = addr.clone();
        self.rtp_addr = addr;
        self
    }

    pub fn with_zrtp_hash(mut self, hash: impl Into<String>) -> Self {
        self.zrtp_hash = Some(hash.into());
        self
    }

    /// Role of a video stream carrying this description
    pub fn video_content(&self) -> VideoContent {
        VideoContent::from_attribute(&self.content)
    }

    /// First payload type of the answer, the one the engine sends with
    pub fn used_payload_type(&self) -> Option<&PayloadType> {
        if self.rtp_port == 0 {
            return None;
        }
        self.payload_types.first()
    }

    /// Whether the stream line was rejected (port zero)
    pub fn is_disabled(&self) -> bool {
        self.rtp_port == 0
    }

    /// Same description with the label ignored
    pub fn matches_ignoring_label(&self, other: &StreamDescription) -> bool {
        let mut a = self.clone();
        a.label.clear();
        let mut b = other.clone();
        b.label.clear();
        a == b
    }
}

/// Where RTP and RTCP are sent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpDestination {
    pub rtp_addr: String,
    pub rtp_port: u16,
    pub rtcp_addr: String,
    pub rtcp_port: u16,
}

/// Local, remote and negotiated descriptions of one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferAnswerContext {
    pub stream_index: StreamIndex,
    pub local: StreamDescription,
    pub remote: Option<StreamDescription>,
    pub result: Option<StreamDescription>,
}

impl OfferAnswerContext {
    /// Context before the answer is known
    pub fn local_only(stream_index: StreamIndex, local: StreamDescription) -> Self {
        Self {
            stream_index,
            local,
            remote: None,
            result: None,
        }
    }

    /// Context of a completed negotiation
    pub fn negotiated(
        stream_index: StreamIndex,
        local: StreamDescription,
        remote: StreamDescription,
        result: StreamDescription,
    ) -> Self {
        Self {
            stream_index,
            local,
            remote: Some(remote),
            result: Some(result),
        }
    }

    /// Peer hello hash advertised in the remote description
    pub fn remote_zrtp_hash(&self) -> Option<&str> {
        self.remote
            .as_ref()
            .and_then(|r| r.zrtp_hash.as_deref())
            .filter(|h| !h.is_empty())
    }

    /// Destination addresses taken from the result, then the remote description
    pub fn rtp_destination(&self) -> Option<RtpDestination> {
        let desc = self.result.as_ref()?;
        let remote = self.remote.as_ref();
        let rtp_addr = if desc.rtp_addr.is_empty() {
            remote.map(|r| r.rtp_addr.clone()).unwrap_or_default()
        } else {
            desc.rtp_addr.clone()
        };
        let rtcp_addr = if desc.rtcp_addr.is_empty() {
            rtp_addr.clone()
        } else {
            desc.rtcp_addr.clone()
        };
        Some(RtpDestination {
            rtp_addr,
            rtp_port: desc.rtp_port,
            rtcp_addr,
            rtcp_port: desc.rtcp_port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_is_ignored_when_comparing() {
        let a = StreamDescription::new(MediaType::Video, 9000).with_label("alice");
        let b = StreamDescription::new(MediaType::Video, 9000).with_label("bob");
        let c = StreamDescription::new(MediaType::Video, 9002).with_label("alice");
        assert!(a.matches_ignoring_label(&b));
        assert!(!a.matches_ignoring_label(&c));
    }

    #[test]
    fn disabled_stream_has_no_payload() {
        let desc = StreamDescription::new(MediaType::Video, 0).with_payload(PayloadType::new(96, "VP8", 90000));
        assert!(desc.used_payload_type().is_none());
    }

    #[test]
    fn destination_falls_back_to_remote_address() {
        let remote = StreamDescription::new(MediaType::Audio, 7078).with_address("192.0.2.4");
        let result = StreamDescription::new(MediaType::Audio, 7078);
        let ctx = OfferAnswerContext::negotiated(0, StreamDescription::new(MediaType::Audio, 9078), remote, result);
        let dest = ctx.rtp_destination().unwrap();
        assert_eq!(dest.rtp_addr, "192.0.2.4");
        assert_eq!(dest.rtcp_addr, "192.0.2.4");
        assert_eq!(dest.rtcp_port, 7079);
    }
}
