//! `scholaris-session`
//!
//! **Responsibility:** client-side session and permission authority.
//!
//! This crate provides:
//! - A scoped, expiring token slot (in memory or on disk)
//! - The remote authority gateway (`login`, `verify`) over HTTP
//! - The [`Authority`] state machine publishing a [`SessionSnapshot`]
//!
//! The remote authority stays the source of truth: the client never infers
//! or caches permissions beyond the last successful verification.

pub mod authority;
pub mod config;
pub mod error;
pub mod remote;
pub mod snapshot;
pub mod token_store;

pub use authority::{Authority, AuthoritySettings, VerifyOutcome};
pub use config::SessionConfig;
pub use error::SessionError;
pub use remote::{HttpAuthorityClient, LoginResponse, RemoteAuthority, RemoteError, VerifyResponse};
pub use snapshot::{Access, SessionPhase, SessionSnapshot};
pub use token_store::{FileTokenStore, MemoryTokenStore, TokenStore, TokenStoreError};
