//! Externally observable session state.

use serde::Serialize;

use scholaris_auth::{Capability, NavNode, PermissionSet, User};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No verification attempted yet.
    Uninitialized,
    Verifying,
    Authenticated,
    Unauthenticated,
}

/// Answer of a route guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// The session is being (re)verified; render a neutral state.
    Pending,
    Allowed,
    Denied,
}

/// `{user, permissions, loading}` as published by the authority.
///
/// # Invariants
/// - `user == None` implies `permissions` is empty.
/// - While `loading` is true, `user` and `permissions` may be stale and must
///   not be used for gating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub permissions: PermissionSet,
    pub loading: bool,
    pub phase: SessionPhase,
}

impl SessionSnapshot {
    /// State at construction, before the first verification.
    pub fn initial() -> Self {
        Self {
            user: None,
            permissions: PermissionSet::empty(),
            loading: true,
            phase: SessionPhase::Uninitialized,
        }
    }

    pub fn unauthenticated() -> Self {
        Self {
            user: None,
            permissions: PermissionSet::empty(),
            loading: false,
            phase: SessionPhase::Unauthenticated,
        }
    }

    pub fn authenticated(user: User, permissions: PermissionSet) -> Self {
        Self {
            user: Some(user),
            permissions,
            loading: false,
            phase: SessionPhase::Authenticated,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Settled with a verified user.
    pub fn is_authenticated(&self) -> bool {
        !self.loading && self.user.is_some()
    }

    /// Guard a navigation node.
    pub fn gate(&self, node: NavNode, capability: Capability) -> Access {
        if self.loading {
            return Access::Pending;
        }
        if self.user.is_none() {
            return Access::Denied;
        }

        if self.permissions.is_allowed(node, capability) {
            Access::Allowed
        } else {
            Access::Denied
        }
    }

    /// Guard a route path (see [`PermissionSet::for_route`]).
    pub fn gate_route(&self, route: &str, capability: Capability) -> Access {
        if self.loading {
            return Access::Pending;
        }

        match self.permissions.for_route(route) {
            Some(node) => self.gate(node, capability),
            None => Access::Denied,
        }
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self::initial()
    }
}
