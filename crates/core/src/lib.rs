//! `scholaris-core`: shared building blocks for the session layer.
//!
//! This crate contains **pure** primitives (no IO, no async).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{MenuId, RoleId, SubmenuId, UserId};
