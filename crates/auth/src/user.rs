//! Identity record of the signed-in user.

use serde::{Deserialize, Serialize};

use scholaris_core::{RoleId, UserId};

/// User record as served by the remote authority.
///
/// Immutable from the client's point of view: every successful verification
/// replaces the whole record, fields are never patched individually.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,

    #[serde(rename = "nombre")]
    pub first_name: String,

    #[serde(rename = "apellido", default)]
    pub last_name: String,

    pub email: String,

    /// Display name of the role (e.g. "Administrador", "Docente").
    #[serde(rename = "rol")]
    pub role_name: String,

    #[serde(rename = "rol_id")]
    pub role_id: RoleId,

    #[serde(rename = "activo", default = "default_active")]
    pub active: bool,

    /// Avatar reference (URL or storage key), if the user uploaded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

fn default_active() -> bool {
    true
}

impl User {
    /// First and last name joined for display.
    pub fn full_name(&self) -> String {
        match (self.first_name.trim(), self.last_name.trim()) {
            (first, "") => first.to_string(),
            ("", last) => last.to_string(),
            (first, last) => format!("{first} {last}"),
        }
    }
}
