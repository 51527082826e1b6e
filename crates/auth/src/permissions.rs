use core::str::FromStr;

use serde::{Deserialize, Serialize};

use scholaris_core::{DomainError, MenuId, SubmenuId};

/// One of the four independent capability flags carried by a grant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    View,
    Create,
    Edit,
    Delete,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::View,
        Capability::Create,
        Capability::Edit,
        Capability::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::View => "view",
            Capability::Create => "create",
            Capability::Edit => "edit",
            Capability::Delete => "delete",
        }
    }
}

impl core::fmt::Display for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "view" | "ver" => Ok(Capability::View),
            "create" | "crear" => Ok(Capability::Create),
            "edit" | "editar" => Ok(Capability::Edit),
            "delete" | "eliminar" => Ok(Capability::Delete),
            other => Err(DomainError::validation(format!("unknown capability '{other}'"))),
        }
    }
}

/// A navigation node a grant can be scoped to.
///
/// A submenu node is distinct from its parent menu: capabilities on one
/// never imply capabilities on the other.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NavNode {
    Menu { menu: MenuId },
    Submenu { menu: MenuId, submenu: SubmenuId },
}

impl NavNode {
    pub fn menu(menu: MenuId) -> Self {
        NavNode::Menu { menu }
    }

    pub fn submenu(menu: MenuId, submenu: SubmenuId) -> Self {
        NavNode::Submenu { menu, submenu }
    }

    pub fn menu_id(&self) -> MenuId {
        match self {
            NavNode::Menu { menu } | NavNode::Submenu { menu, .. } => *menu,
        }
    }

    pub fn submenu_id(&self) -> Option<SubmenuId> {
        match self {
            NavNode::Menu { .. } => None,
            NavNode::Submenu { submenu, .. } => Some(*submenu),
        }
    }
}

impl core::fmt::Display for NavNode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            NavNode::Menu { menu } => write!(f, "menu {menu}"),
            NavNode::Submenu { menu, submenu } => write!(f, "menu {menu} / submenu {submenu}"),
        }
    }
}

/// One capability grant, scoped to a menu or submenu.
///
/// Field names on the wire follow the remote authority's contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub menu_id: MenuId,

    #[serde(rename = "menu_nombre", default)]
    pub menu_name: String,

    #[serde(rename = "menu_ruta", default)]
    pub menu_route: String,

    #[serde(rename = "menu_icono", default)]
    pub menu_icon: Option<String>,

    #[serde(default)]
    pub submenu_id: Option<SubmenuId>,

    #[serde(rename = "submenu_nombre", default)]
    pub submenu_name: Option<String>,

    #[serde(rename = "submenu_ruta", default)]
    pub submenu_route: Option<String>,

    #[serde(rename = "puede_ver", default)]
    pub can_view: bool,

    #[serde(rename = "puede_crear", default)]
    pub can_create: bool,

    #[serde(rename = "puede_editar", default)]
    pub can_edit: bool,

    #[serde(rename = "puede_eliminar", default)]
    pub can_delete: bool,
}

impl Permission {
    /// Node this grant applies to.
    pub fn node(&self) -> NavNode {
        match self.submenu_id {
            Some(submenu) => NavNode::submenu(self.menu_id, submenu),
            None => NavNode::menu(self.menu_id),
        }
    }

    pub fn is_submenu(&self) -> bool {
        self.submenu_id.is_some()
    }

    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::View => self.can_view,
            Capability::Create => self.can_create,
            Capability::Edit => self.can_edit,
            Capability::Delete => self.can_delete,
        }
    }

    /// Route of the node this grant applies to.
    pub fn route(&self) -> &str {
        match &self.submenu_route {
            Some(route) if self.is_submenu() => route,
            _ => &self.menu_route,
        }
    }
}
