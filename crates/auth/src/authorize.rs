use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Capability, NavNode, Permission};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PermissionError {
    /// The remote authority returned more than one grant for the same node.
    ///
    /// The grants are not merged; the caller must fail closed.
    #[error("ambiguous permission data: {count} grants for {node}")]
    Ambiguous { node: NavNode, count: usize },
}

/// The permission set of one verified session.
///
/// Exactly the sequence the remote authority returned, in its order. It is
/// never unioned with an earlier session's grants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(Vec<Permission>);

impl PermissionSet {
    pub fn new(permissions: Vec<Permission>) -> Self {
        Self(permissions)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[Permission] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn matching(&self, node: NavNode) -> impl Iterator<Item = &Permission> {
        self.0.iter().filter(move |p| p.node() == node)
    }

    /// Can the session perform `capability` on `node`?
    ///
    /// - No grant for the node: `Ok(false)` (fail closed)
    /// - Exactly one grant: its flag
    /// - Several grants: `Err(Ambiguous)`, never OR/AND-merged
    pub fn check(&self, node: NavNode, capability: Capability) -> Result<bool, PermissionError> {
        let mut matches = self.matching(node);

        let Some(grant) = matches.next() else {
            return Ok(false);
        };

        let extra = matches.count();
        if extra > 0 {
            return Err(PermissionError::Ambiguous {
                node,
                count: extra + 1,
            });
        }

        Ok(grant.allows(capability))
    }

    /// Like [`check`](Self::check), but collapses an integrity fault into a
    /// denial after logging it.
    pub fn is_allowed(&self, node: NavNode, capability: Capability) -> bool {
        match self.check(node, capability) {
            Ok(granted) => granted,
            Err(err) => {
                tracing::warn!(%node, %capability, "denying access: {err}");
                false
            }
        }
    }

    /// Resolve a route path to the node that owns it.
    ///
    /// Submenu routes win over menu routes so that `/matricula/alumnos` maps to
    /// the child node even when the parent menu shares the prefix. Leading and
    /// trailing slashes are ignored.
    pub fn for_route(&self, route: &str) -> Option<NavNode> {
        let wanted = normalize_route(route);

        self.0
            .iter()
            .find(|p| {
                p.submenu_id.is_some()
                    && p.submenu_route.as_deref().map(normalize_route) == Some(wanted)
            })
            .or_else(|| {
                self.0
                    .iter()
                    .find(|p| p.submenu_id.is_none() && normalize_route(&p.menu_route) == wanted)
            })
            .map(Permission::node)
    }

    /// Nodes that carry more than one grant, in first-seen order.
    pub fn integrity_faults(&self) -> Vec<IntegrityFault> {
        let mut counts: HashMap<NavNode, usize> = HashMap::new();
        let mut order: Vec<NavNode> = Vec::new();

        for perm in &self.0 {
            let node = perm.node();
            let count = counts.entry(node).or_insert(0);
            if *count == 0 {
                order.push(node);
            }
            *count += 1;
        }

        order
            .into_iter()
            .filter_map(|node| {
                let count = counts[&node];
                (count > 1).then_some(IntegrityFault { node, count })
            })
            .collect()
    }

    /// Explain why a capability check resolves the way it does.
    pub fn explain(&self, node: NavNode, capability: Capability) -> AuthorizationExplanation {
        let matched: Vec<Permission> = self.matching(node).cloned().collect();

        let (granted, reason, denial) = match matched.as_slice() {
            [] => (
                false,
                format!("no grant exists for {node}"),
                Some(DenialKind::NoGrant),
            ),
            [grant] if grant.allows(capability) => (
                true,
                format!("grant for {node} sets '{capability}'"),
                None,
            ),
            [_] => (
                false,
                format!("grant for {node} does not set '{capability}'"),
                Some(DenialKind::FlagNotSet),
            ),
            many => (
                false,
                format!(
                    "{} conflicting grants for {node}; refusing to pick one",
                    many.len()
                ),
                Some(DenialKind::Ambiguous),
            ),
        };

        AuthorizationExplanation {
            node,
            capability,
            granted,
            reason,
            denial,
            matched,
        }
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a PermissionSet {
    type Item = &'a Permission;
    type IntoIter = core::slice::Iter<'a, Permission>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

fn normalize_route(route: &str) -> &str {
    route.trim().trim_matches('/')
}

/// A node with more than one grant in the same permission set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntegrityFault {
    pub node: NavNode,
    pub count: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed, serializable account of a capability check.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub node: NavNode,
    pub capability: Capability,
    pub granted: bool,

    /// Human-readable reason for the decision.
    pub reason: String,

    pub denial: Option<DenialKind>,

    /// Every grant that matched the node (zero, one, or conflicting several).
    pub matched: Vec<Permission>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    NoGrant,
    FlagNotSet,
    Ambiguous,
}
