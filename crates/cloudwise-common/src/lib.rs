//! Shared vocabulary for the CloudWise workspace.
//!
//! Provider and account-reference types, status/severity enums with their
//! string round-tripping, and process-wide Snowflake ID generation live
//! here so that storage, insights, and the HTTP layer agree on one set of
//! definitions.

pub mod id;
pub mod types;
