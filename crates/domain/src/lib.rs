//! Shared types used across the conclave workspace: the conversation/message
//! model, the normalized stream event taxonomy, configuration, and the
//! common error type. Dependency-light by design — `gateway` and
//! `providers` both depend on this crate, never the reverse.

pub mod capability;
pub mod config;
pub mod conversation;
pub mod cost;
pub mod error;
pub mod stream;
pub mod tool;
pub mod trace;

pub use error::{Error, Result};
