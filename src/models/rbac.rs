// src/models/rbac.rs

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_SUPERVISOR: &str = "supervisor";
pub const ROLE_WAREHOUSE: &str = "warehouse";
pub const ROLE_COMMERCIAL: &str = "commercial";

const ALL_SENTINEL: &str = "all";
const WILDCARD: &str = "*";

/// Permissões de um papel: `{"orders": ["read", "validate"]}` ou a string `"all"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RolePermissions {
    Sentinel(String),
    Modules(HashMap<String, Vec<String>>),
}

impl Default for RolePermissions {
    fn default() -> Self {
        RolePermissions::Modules(HashMap::new())
    }
}

impl RolePermissions {
    /// `slug` no formato `modulo.acao`. Não trata o papel admin: isso é decidido pelo `Principal`.
    pub fn allows(&self, slug: &str) -> bool {
        let Some((module, action)) = slug.split_once('.') else {
            return false;
        };

        match self {
            RolePermissions::Sentinel(s) => s == ALL_SENTINEL,
            RolePermissions::Modules(map) => {
                let in_module = map
                    .get(module)
                    .is_some_and(|actions| actions.iter().any(|a| a == action));
                let global_wildcard = map
                    .get(ALL_SENTINEL)
                    .is_some_and(|actions| actions.iter().any(|a| a == WILDCARD));
                in_module || global_wildcard
            }
        }
    }

    /// Lista achatada `modulo.acao`, usada no perfil do usuário.
    pub fn slugs(&self) -> Vec<String> {
        match self {
            RolePermissions::Sentinel(s) => vec![s.clone()],
            RolePermissions::Modules(map) => {
                let mut slugs: Vec<String> = map
                    .iter()
                    .flat_map(|(module, actions)| actions.iter().map(move |a| format!("{module}.{a}")))
                    .collect();
                slugs.sort();
                slugs
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modules(pairs: &[(&str, &[&str])]) -> RolePermissions {
        RolePermissions::Modules(
            pairs
                .iter()
                .map(|(m, actions)| (m.to_string(), actions.iter().map(|a| a.to_string()).collect()))
                .collect(),
        )
    }

    #[test]
    fn module_action_must_be_listed() {
        let perms = modules(&[("orders", &["read", "validate"])]);
        assert!(perms.allows("orders.validate"));
        assert!(!perms.allows("orders.create"));
        assert!(!perms.allows("sales.confirm"));
    }

    #[test]
    fn all_wildcard_grants_everything() {
        let perms = modules(&[("all", &["*"])]);
        assert!(perms.allows("sales.confirm"));
        assert!(perms.allows("chat.delete"));
    }

    #[test]
    fn all_sentinel_string_grants_everything() {
        let perms: RolePermissions = serde_json::from_str("\"all\"").expect("sentinel");
        assert!(perms.allows("outgoings.create"));
    }

    #[test]
    fn malformed_slug_is_denied() {
        let perms = modules(&[("orders", &["read"])]);
        assert!(!perms.allows("orders"));
    }

    #[test]
    fn parses_module_map_from_json() {
        let perms: RolePermissions =
            serde_json::from_str(r#"{"chat": ["read", "create"]}"#).expect("map");
        assert!(perms.allows("chat.create"));
        assert_eq!(perms.slugs(), vec!["chat.create", "chat.read"]);
    }
}
