//! Shared types for the FieldOps dispatch platform
//!
//! Domain records used across the server and clients: interventions
//! (service requests), dispatch attempts (time-boxed technician offers),
//! payment authorizations (provider-side fund holds) and the change-feed
//! event types the server publishes after every mutation.

pub mod dispatch;
pub mod feed;
pub mod intervention;
pub mod payment;
pub mod util;

// Re-exports
pub use dispatch::{AttemptStatus, DispatchAttempt};
pub use feed::{EntityType, FeedEvent, FeedEventKind};
pub use intervention::{
    Intervention, InterventionStatus, Priority, ServiceCategory,
};
pub use payment::{AuthorizationStatus, PaymentAuthorization};
pub use serde::{Deserialize, Serialize};
