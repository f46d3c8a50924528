//! Payment authorization subsystem
//!
//! - [`provider`] - external processor seam (customers, manual-capture holds)
//! - [`manager`] - authorize / cancel / capture lifecycle

pub mod manager;
pub mod provider;

pub use manager::{PaymentError, PaymentManager, PaymentResult};
pub use provider::{PaymentProvider, ProviderAuthorization, ProviderError, SandboxProvider};
