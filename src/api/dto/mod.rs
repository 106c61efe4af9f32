//! Data Transfer Objects for REST request/response serialization.
//!
//! Field names are camelCase on the wire.

pub mod narrative_dto;
pub mod queue_dto;

pub use narrative_dto::*;
pub use queue_dto::*;
