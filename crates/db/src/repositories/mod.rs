//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod component_grade_repo;
pub mod enrolment_event_repo;
pub mod extension_task_repo;
pub mod extension_tier_repo;
pub mod mapping_repo;
pub mod override_repo;
pub mod processed_message_repo;
pub mod withdrawal_repo;

pub use component_grade_repo::ComponentGradeRepo;
pub use enrolment_event_repo::EnrolmentEventRepo;
pub use extension_task_repo::ExtensionTaskRepo;
pub use extension_tier_repo::ExtensionTierRepo;
pub use mapping_repo::MappingRepo;
pub use override_repo::OverrideRepo;
pub use processed_message_repo::ProcessedMessageRepo;
pub use withdrawal_repo::WithdrawalRepo;
