//! Change-feed event types
//!
//! Published by the server after every committed mutation so presentation
//! layers can react. Fire-and-forget: a publish failure never blocks the
//! mutation that triggered it.

use serde::{Deserialize, Serialize};

/// Entity kind carried by a feed event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Intervention,
    DispatchAttempt,
    PaymentAuthorization,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Intervention => write!(f, "intervention"),
            Self::DispatchAttempt => write!(f, "dispatch_attempt"),
            Self::PaymentAuthorization => write!(f, "payment_authorization"),
        }
    }
}

/// What happened to the entity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedEventKind {
    // Intervention lifecycle
    InterventionCreated,
    InterventionAssigned,
    InterventionStatusChanged,
    InterventionCancelled,
    ManualDispatchRequired,

    // Dispatch attempts
    AttemptCreated,
    AttemptAccepted,
    AttemptDeclined,
    AttemptTimedOut,
    AttemptCancelled,

    // Payments
    PaymentAuthorized,
    PaymentCancelled,
    PaymentCaptured,
    PaymentFailed,
}

/// One change-feed entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedEvent {
    pub entity: EntityType,
    pub entity_id: String,
    pub kind: FeedEventKind,
    /// Server timestamp (Unix millis)
    pub timestamp: i64,
}

impl FeedEvent {
    pub fn new(entity: EntityType, entity_id: impl Into<String>, kind: FeedEventKind) -> Self {
        Self {
            entity,
            entity_id: entity_id.into(),
            kind,
            timestamp: crate::util::now_millis(),
        }
    }
}
