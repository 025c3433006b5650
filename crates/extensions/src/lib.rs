//! Extension processing engine.
//!
//! Consumes normalized accommodation (RAA) and extenuating-circumstance (EC)
//! updates and keeps activity schedule overrides in step with them:
//!
//! - [`resolver`] finds the mappings an update applies to.
//! - [`applier`] computes and writes (or reverses) overrides per mapping.
//! - [`engine`] routes one update through resolver and applier.
//! - [`processor`] drains the inbound queues into the engine.
//! - [`rescan`] and [`tasks`] run the batch paths (new mapping, new
//!   enrolments, full re-scan) from the deferred task table.
//!
//! Every collaborator is injected as an `Arc<dyn Trait>` so the whole engine
//! runs against in-memory fakes in tests.

pub mod applier;
pub mod clock;
pub mod engine;
pub mod error;
pub mod lms;
pub mod processor;
pub mod queue;
pub mod records;
pub mod rescan;
pub mod resolver;
pub mod store;
pub mod tasks;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::ExtensionError;
