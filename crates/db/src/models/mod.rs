//! Row structs and create DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct matching
//! the database row and, where rows are inserted from code, a create DTO.

pub mod component_grade;
pub mod enrolment_event;
pub mod extension_task;
pub mod extension_tier;
pub mod mapping;
pub mod override_record;
pub mod processed_message;
pub mod status;
pub mod withdrawal;
