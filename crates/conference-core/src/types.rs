//! Identifiers, addresses and states of conferences

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Conference identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConferenceId(pub Uuid);

impl ConferenceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConferenceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SIP address of a participant or device
///
/// Ordering is plain string ordering. [`ParticipantAddress::weak_equal`]
/// ignores URI parameters and case, the way participant lists are
/// de-duplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantAddress(String);

impl ParticipantAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address without display name, angle brackets and URI parameters
    pub fn uri(&self) -> &str {
        let trimmed = self.0.trim();
        let inner = match (trimmed.find('<'), trimmed.rfind('>')) {
            (Some(start), Some(end)) if start < end => &trimmed[start + 1..end],
            _ => trimmed,
        };
        inner.split(';').next().unwrap_or(inner).trim()
    }

    /// Same user and host, whatever the parameters
    pub fn weak_equal(&self, other: &ParticipantAddress) -> bool {
        self.uri().eq_ignore_ascii_case(other.uri())
    }

    /// Copy of the address with a `;name=value` URI parameter appended
    pub fn with_param(&self, name: &str, value: &str) -> Self {
        Self(format!("{};{}={}", self.uri(), name, value))
    }

    pub fn is_empty(&self) -> bool {
        self.uri().is_empty()
    }
}

impl fmt::Display for ParticipantAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lifecycle of a conference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConferenceState {
    #[default]
    Instantiated,
    CreationPending,
    Created,
    CreationFailed,
    TerminationPending,
    Terminated,
    TerminationFailed,
    Deleted,
}

impl ConferenceState {
    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(&self, next: ConferenceState) -> bool {
        use ConferenceState::*;
        match (self, next) {
            (Instantiated, CreationPending | Created | CreationFailed | TerminationPending) => true,
            (CreationPending, Created | CreationFailed | TerminationPending) => true,
            (Created, TerminationPending | Terminated) => true,
            (CreationFailed, TerminationPending | Deleted) => true,
            (TerminationPending, Terminated | TerminationFailed) => true,
            (TerminationFailed, TerminationPending | Deleted) => true,
            (Terminated, Deleted) => true,
            _ => false,
        }
    }

    /// Termination has started or is over
    pub fn is_ending(&self) -> bool {
        matches!(
            self,
            ConferenceState::TerminationPending | ConferenceState::Terminated | ConferenceState::Deleted
        )
    }
}

impl fmt::Display for ConferenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConferenceState::Instantiated => "Instantiated",
            ConferenceState::CreationPending => "CreationPending",
            ConferenceState::Created => "Created",
            ConferenceState::CreationFailed => "CreationFailed",
            ConferenceState::TerminationPending => "TerminationPending",
            ConferenceState::Terminated => "Terminated",
            ConferenceState::TerminationFailed => "TerminationFailed",
            ConferenceState::Deleted => "Deleted",
        };
        f.write_str(name)
    }
}

/// Presence of a participant device in the conference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceState {
    #[default]
    Joining,
    Present,
    OnHold,
    Leaving,
    Left,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_equal_ignores_parameters_and_case() {
        let a = ParticipantAddress::new("sip:Alice@example.org;transport=tcp");
        let b = ParticipantAddress::new("\"Alice\" <sip:alice@example.org>");
        let c = ParticipantAddress::new("sip:bob@example.org");
        assert!(a.weak_equal(&b));
        assert!(!a.weak_equal(&c));
        assert_eq!(b.uri(), "sip:alice@example.org");
    }

    #[test]
    fn admin_parameter_is_appended_to_the_bare_uri() {
        let focus = ParticipantAddress::new("<sip:conf@example.org;gr=abc>");
        assert_eq!(focus.with_param("admin", "1").as_str(), "sip:conf@example.org;admin=1");
    }

    #[test]
    fn state_machine_rejects_going_back() {
        assert!(ConferenceState::Instantiated.can_transition_to(ConferenceState::CreationPending));
        assert!(ConferenceState::Created.can_transition_to(ConferenceState::TerminationPending));
        assert!(!ConferenceState::Terminated.can_transition_to(ConferenceState::Created));
        assert!(!ConferenceState::Created.can_transition_to(ConferenceState::Created));
        assert!(!ConferenceState::Deleted.can_transition_to(ConferenceState::Instantiated));
    }
}
