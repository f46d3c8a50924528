//! Technician dispatch subsystem
//!
//! - [`storage`] - redb-backed store; every status transition is a CAS
//! - [`orchestrator`] - the per-intervention assignment state machine
//! - [`scanner`] - periodic sweep expiring elapsed offers
//! - [`selector`] - candidate ranking seam

pub mod orchestrator;
pub mod scanner;
pub mod selector;
pub mod storage;

pub use orchestrator::{CheckTimeoutOutcome, DispatchError, DispatchOrchestrator, DispatchResult};
pub use scanner::{scan_once, InterventionScanResult, ScanReport, TimeoutScanner};
pub use selector::{CandidateSelector, SelectorError, StaticRoster};
pub use storage::{DispatchStorage, PendingOffer, StorageError, StorageResult, Transition};
