//! Navigation tree derived from a permission set.
//!
//! Sidebar rendering only needs to know which nodes are viewable. A menu is
//! listed when it is viewable itself or has at least one viewable submenu;
//! menus and submenus keep the order in which the authority returned them.

use std::collections::HashMap;

use serde::Serialize;

use scholaris_core::{MenuId, SubmenuId};

use crate::{Capability, NavNode, PermissionSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuEntry {
    pub menu_id: MenuId,
    pub name: String,
    pub route: String,
    pub icon: Option<String>,
    /// Whether the menu node itself grants `view`.
    pub viewable: bool,
    pub submenus: Vec<SubmenuEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmenuEntry {
    pub submenu_id: SubmenuId,
    pub name: String,
    pub route: String,
}

/// Build the viewable navigation tree.
///
/// Ambiguous nodes are treated as not viewable.
pub fn navigation(permissions: &PermissionSet) -> Vec<MenuEntry> {
    let mut menus: Vec<MenuEntry> = Vec::new();
    let mut index: HashMap<MenuId, usize> = HashMap::new();

    for perm in permissions {
        let slot = *index.entry(perm.menu_id).or_insert_with(|| {
            menus.push(MenuEntry {
                menu_id: perm.menu_id,
                name: perm.menu_name.clone(),
                route: perm.menu_route.clone(),
                icon: perm.menu_icon.clone(),
                viewable: false,
                submenus: Vec::new(),
            });
            menus.len() - 1
        });
        let menu = &mut menus[slot];

        match perm.submenu_id {
            None => {
                menu.viewable = permissions.is_allowed(NavNode::menu(perm.menu_id), Capability::View);
            }
            Some(submenu_id) => {
                let node = NavNode::submenu(perm.menu_id, submenu_id);
                let listed = menu.submenus.iter().any(|s| s.submenu_id == submenu_id);
                if !listed && permissions.is_allowed(node, Capability::View) {
                    menu.submenus.push(SubmenuEntry {
                        submenu_id,
                        name: perm.submenu_name.clone().unwrap_or_default(),
                        route: perm.submenu_route.clone().unwrap_or_default(),
                    });
                }
            }
        }
    }

    menus
        .into_iter()
        .filter(|menu| menu.viewable || !menu.submenus.is_empty())
        .collect()
}
