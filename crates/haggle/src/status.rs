//! Conversation status values.
//!
//! The stored status is always one of [`VALID_STATUSES`]. No transition table
//! is enforced on the raw value; the two sanctioned transitions only accept
//! the narrower [`AcceptanceStatus`] and [`ClosingStatus`] enums.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HaggleError;

/// Wire strings of every status a conversation can hold.
pub const VALID_STATUSES: [&str; 6] = [
    "pending",
    "accepted",
    "rejected",
    "free",
    "confirmed",
    "canceled",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
    Free,
    Confirmed,
    Canceled,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Pending => "pending",
            ConversationStatus::Accepted => "accepted",
            ConversationStatus::Rejected => "rejected",
            ConversationStatus::Free => "free",
            ConversationStatus::Confirmed => "confirmed",
            ConversationStatus::Canceled => "canceled",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ConversationStatus::Pending)
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationStatus {
    type Err = HaggleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ConversationStatus::Pending),
            "accepted" => Ok(ConversationStatus::Accepted),
            "rejected" => Ok(ConversationStatus::Rejected),
            "free" => Ok(ConversationStatus::Free),
            "confirmed" => Ok(ConversationStatus::Confirmed),
            "canceled" => Ok(ConversationStatus::Canceled),
            other => Err(HaggleError::validation(format!(
                "status must be one of {:?}, got {:?}",
                VALID_STATUSES, other
            ))),
        }
    }
}

/// Outcome of the accept/reject step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptanceStatus {
    Accepted,
    Rejected,
    Free,
}

impl From<AcceptanceStatus> for ConversationStatus {
    fn from(status: AcceptanceStatus) -> Self {
        match status {
            AcceptanceStatus::Accepted => ConversationStatus::Accepted,
            AcceptanceStatus::Rejected => ConversationStatus::Rejected,
            AcceptanceStatus::Free => ConversationStatus::Free,
        }
    }
}

/// Outcome of the confirm/cancel step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosingStatus {
    Confirmed,
    Canceled,
}

impl From<ClosingStatus> for ConversationStatus {
    fn from(status: ClosingStatus) -> Self {
        match status {
            ClosingStatus::Confirmed => ConversationStatus::Confirmed,
            ClosingStatus::Canceled => ConversationStatus::Canceled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_valid_status_parses_back_to_itself() {
        for s in VALID_STATUSES {
            let status: ConversationStatus = s.parse().unwrap();
            assert_eq!(status.as_str(), s);
        }
    }

    #[test]
    fn unknown_statuses_are_validation_errors() {
        for s in ["", "Pending", "cancelled", "closed", " pending"] {
            let err = s.parse::<ConversationStatus>().unwrap_err();
            assert!(err.is_validation(), "{s:?} should be rejected");
        }
    }

    #[test]
    fn serde_uses_wire_strings() {
        let json = serde_json::to_value(ConversationStatus::Canceled).unwrap();
        assert_eq!(json, "canceled");
        assert_eq!(
            ConversationStatus::from(AcceptanceStatus::Free),
            ConversationStatus::Free
        );
    }
}
