//! Pure domain logic for SITS extension processing.
//!
//! This crate has zero internal deps and performs no I/O, so every module
//! can be exercised directly with literal fixtures:
//!
//! - [`provision`]: provision record to extension directive (plus tier table).
//! - [`normalizer`]: inbound event payloads to canonical [`normalizer::ExtensionUpdate`].
//! - [`schedule`]: deadline arithmetic and RAA group naming.
//! - [`scan`]: re-scan request scopes and overlap detection.

pub mod activity;
pub mod error;
pub mod normalizer;
pub mod provision;
pub mod scan;
pub mod schedule;
pub mod types;
