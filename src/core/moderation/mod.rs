// Core moderation module - the platform-agnostic automod engine.
// Detectors, trust scoring, punishment ladder, audit log and staff overrides.

pub mod action_dispatcher;
pub mod audit_log;
pub mod builtin_detectors;
pub mod cooldown_tracker;
pub mod detector_pipeline;
pub mod exclusion;
pub mod keyed_locks;
pub mod moderation_errors;
pub mod moderation_models;
pub mod moderation_service;
pub mod moderation_store;
pub mod platform;
pub mod punishment_evaluator;
pub mod revocation_service;
pub mod snowflake;
pub mod trust_service;

#[cfg(test)]
pub mod test_support;

pub use action_dispatcher::{DispatchPolicy, DispatchReport};
pub use audit_log::{Notifier, NotifyError};
pub use builtin_detectors::builtin_registry;
pub use detector_pipeline::{Detector, DetectorError, DetectorRegistry};
pub use moderation_errors::ModerationError;
pub use moderation_models::*;
pub use moderation_service::{EventOutcome, LogView, ModerationEngine};
pub use moderation_store::*;
pub use platform::{PlatformActions, PlatformError};
