//! `scholaris-auth`: pure session and permission model.
//!
//! This crate is intentionally decoupled from HTTP, storage and async: it
//! describes what the remote authority returns and how a permission set is
//! evaluated. The session crate owns the lifecycle.

pub mod authorize;
pub mod navigation;
pub mod permissions;
pub mod token;
pub mod user;

pub use authorize::{
    AuthorizationExplanation, DenialKind, IntegrityFault, PermissionError, PermissionSet,
};
pub use navigation::{MenuEntry, SubmenuEntry, navigation};
pub use permissions::{Capability, NavNode, Permission};
pub use token::SessionToken;
pub use user::User;
