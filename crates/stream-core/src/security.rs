//! Security session material of a stream
//!
//! [`SecuritySessions`] survives pipeline restarts: stopping a stream hands it
//! back and the recreated pipeline takes it over, so ZRTP and SRTP state go on
//! without renegotiating keys.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, StreamError};

/// Media encryption schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MediaEncryption {
    #[default]
    None,
    Srtp,
    Zrtp,
    Dtls,
}

impl fmt::Display for MediaEncryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaEncryption::None => "none",
            MediaEncryption::Srtp => "srtp",
            MediaEncryption::Zrtp => "zrtp",
            MediaEncryption::Dtls => "dtls",
        };
        f.write_str(name)
    }
}

/// Version prefix of the `zrtp-hash` attribute
pub const ZRTP_HASH_VERSION: &str = "1.10";

/// ZRTP engine state of one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZrtpContext {
    id: Uuid,
    zid: [u8; 12],
    master: Option<Uuid>,
    local_hello_hash: String,
    peer_hello_hash: Option<String>,
    go_clear: bool,
    started: bool,
    secured: bool,
}

impl ZrtpContext {
    /// Create a new context with a fresh ZID
    pub fn new(go_clear: bool) -> Self {
        let mut zid = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut zid);
        Self::with_zid(zid, None, go_clear)
    }

    /// Derive a multistream context sharing the ZID of `master`
    pub fn multistream(master: &ZrtpContext, go_clear: bool) -> Self {
        Self::with_zid(master.zid, Some(master.id), go_clear)
    }

    fn with_zid(zid: [u8; 12], master: Option<Uuid>, go_clear: bool) -> Self {
        let id = Uuid::new_v4();
        let mut hasher = Sha256::new();
        hasher.update(zid);
        hasher.update(id.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Self {
            id,
            zid,
            master,
            local_hello_hash: format!("{} {}", ZRTP_HASH_VERSION, hex),
            peer_hello_hash: None,
            go_clear,
            started: false,
            secured: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Id of the context this one was derived from
    pub fn master(&self) -> Option<Uuid> {
        self.master
    }

    pub fn shares_zid_with(&self, other: &ZrtpContext) -> bool {
        self.zid == other.zid
    }

    /// Value of our `zrtp-hash` attribute
    pub fn local_hello_hash(&self) -> &str {
        &self.local_hello_hash
    }

    pub fn peer_hello_hash(&self) -> Option<&str> {
        self.peer_hello_hash.as_deref()
    }

    /// Record the peer hello hash
    ///
    /// Setting the same hash again is accepted; a different hash is a
    /// mismatch and leaves the recorded one in place.
    pub fn set_peer_hello_hash(&mut self, hash: &str) -> Result<()> {
        let hash = hash.trim();
        match &self.peer_hello_hash {
            None => {
                debug!("ZRTP context {} got peer hello hash", self.id);
                self.peer_hello_hash = Some(hash.to_string());
                Ok(())
            }
            Some(known) if known.eq_ignore_ascii_case(hash) => Ok(()),
            Some(known) => Err(StreamError::ZrtpHashMismatch {
                expected: known.clone(),
                received: hash.to_string(),
            }),
        }
    }

    pub fn enable_go_clear(&mut self, enabled: bool) {
        self.go_clear = enabled;
    }

    pub fn go_clear_enabled(&self) -> bool {
        self.go_clear
    }

    /// Start the ZRTP engine (idempotent)
    pub fn start(&mut self) {
        self.started = true;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Key agreement completed
    pub fn mark_secured(&mut self) {
        self.started = true;
        self.secured = true;
    }

    pub fn is_secured(&self) -> bool {
        self.secured
    }
}

/// SDES-keyed SRTP session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrtpSession {
    pub suite: String,
    pub key: String,
}

/// Security material carried from one pipeline to the next
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecuritySessions {
    pub zrtp: Option<ZrtpContext>,
    pub srtp: Option<SrtpSession>,
    pub dtls_established: bool,
}

impl SecuritySessions {
    /// Whether media is currently protected
    pub fn is_encrypted(&self) -> bool {
        self.srtp.is_some()
            || self.dtls_established
            || self.zrtp.as_ref().map(|z| z.is_secured()).unwrap_or(false)
    }

    /// Install an SDES key
    pub fn enable_srtp(&mut self, suite: impl Into<String>, key: impl Into<String>) {
        self.srtp = Some(SrtpSession {
            suite: suite.into(),
            key: key.into(),
        });
    }
}
