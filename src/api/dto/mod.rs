//! Data Transfer Objects for REST request/response serialization.
//!
//! Cursor positions are rendered as `date time#index` strings so clients
//! do not need to know the store layout.

pub mod source_dto;

pub use source_dto::*;
