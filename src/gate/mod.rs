//! Role to capability mapping.
//!
//! Every verdict is computed from the static table below on each call. A
//! missing role denies everything, so callers cannot tell "signed out" from
//! "not allowed" and never need to.

pub mod routes;

use crate::auth::types::Role;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, str::FromStr};

/// A view or action reachable from the console.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    ViewVms,
    SshConnect,
    ViewLogs,
    ViewAlerts,
    ManageSettings,
}

impl Capability {
    pub const ALL: [Self; 5] = [
        Self::ViewVms,
        Self::SshConnect,
        Self::ViewLogs,
        Self::ViewAlerts,
        Self::ManageSettings,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ViewVms => "view-vms",
            Self::SshConnect => "ssh-connect",
            Self::ViewLogs => "view-logs",
            Self::ViewAlerts => "view-alerts",
            Self::ManageSettings => "manage-settings",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|capability| capability.as_str() == value)
            .ok_or_else(|| format!("unknown capability: {value}"))
    }
}

/// How far a granted capability reaches.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessLevel {
    ReadOnly,
    Full,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReadOnly => "read-only",
            Self::Full => "full",
        })
    }
}

const ADMIN_GRANTS: &[(Capability, AccessLevel)] = &[
    (Capability::ViewVms, AccessLevel::ReadOnly),
    (Capability::ManageSettings, AccessLevel::Full),
];

const DEVELOPER_GRANTS: &[(Capability, AccessLevel)] = &[
    (Capability::ViewVms, AccessLevel::Full),
    (Capability::SshConnect, AccessLevel::Full),
    (Capability::ManageSettings, AccessLevel::Full),
];

const SOC_GRANTS: &[(Capability, AccessLevel)] = &[
    (Capability::ViewLogs, AccessLevel::Full),
    (Capability::ViewAlerts, AccessLevel::Full),
    (Capability::ManageSettings, AccessLevel::Full),
];

const fn grants(role: Role) -> &'static [(Capability, AccessLevel)] {
    match role {
        Role::Admin => ADMIN_GRANTS,
        Role::Developer => DEVELOPER_GRANTS,
        Role::Soc => SOC_GRANTS,
    }
}

/// Access level `role` holds on `capability`, `None` when denied.
#[must_use]
pub fn access_level(role: Option<Role>, capability: Capability) -> Option<AccessLevel> {
    grants(role?)
        .iter()
        .find(|(granted, _)| *granted == capability)
        .map(|(_, level)| *level)
}

#[must_use]
pub fn can_access(role: Option<Role>, capability: Capability) -> bool {
    access_level(role, capability).is_some()
}

/// Every capability `role` holds; empty without a role.
#[must_use]
pub fn visible_capabilities(role: Option<Role>) -> BTreeSet<Capability> {
    role.map(grants)
        .unwrap_or_default()
        .iter()
        .map(|(capability, _)| *capability)
        .collect()
}
