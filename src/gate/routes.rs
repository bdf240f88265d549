//! Console routes and the guard in front of them.

use crate::{
    auth::types::Role,
    gate::{can_access, Capability},
};
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ConsoleRoute {
    Login,
    Dashboard,
    Vms,
    Terminal,
    Logs,
    Alerts,
    Settings,
}

impl ConsoleRoute {
    pub const ALL: [Self; 7] = [
        Self::Login,
        Self::Dashboard,
        Self::Vms,
        Self::Terminal,
        Self::Logs,
        Self::Alerts,
        Self::Settings,
    ];

    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::Login => "/login",
            Self::Dashboard => "/dashboard",
            Self::Vms => "/vms",
            Self::Terminal => "/terminal",
            Self::Logs => "/logs",
            Self::Alerts => "/alerts",
            Self::Settings => "/settings",
        }
    }

    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::Login => "Login",
            Self::Dashboard => "Dashboard",
            Self::Vms => "Virtual Machines",
            Self::Terminal => "SSH Terminal",
            Self::Logs => "Logs",
            Self::Alerts => "Security Alerts",
            Self::Settings => "Settings",
        }
    }

    /// Capability needed beyond a session. `None` for the dashboard (any
    /// session) and for the login page.
    #[must_use]
    pub fn required_capability(self) -> Option<Capability> {
        match self {
            Self::Login | Self::Dashboard => None,
            Self::Vms => Some(Capability::ViewVms),
            Self::Terminal => Some(Capability::SshConnect),
            Self::Logs => Some(Capability::ViewLogs),
            Self::Alerts => Some(Capability::ViewAlerts),
            Self::Settings => Some(Capability::ManageSettings),
        }
    }

    /// Resolves a path; `/` and anything unknown land on the dashboard.
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        let path = path.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();
        let trimmed = path.trim_end_matches('/');

        Self::ALL
            .into_iter()
            .find(|route| route.path() == trimmed)
            .unwrap_or(Self::Dashboard)
    }
}

impl fmt::Display for ConsoleRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RouteDecision {
    Allow,
    RedirectToLogin,
    RedirectToDashboard,
}

/// Decides whether `role` may open `route`. Signed-out visitors only see the
/// login page; signed-in ones are bounced off it.
#[must_use]
pub fn guard(role: Option<Role>, route: ConsoleRoute) -> RouteDecision {
    match (role, route) {
        (None, ConsoleRoute::Login) => RouteDecision::Allow,
        (None, _) => RouteDecision::RedirectToLogin,
        (Some(_), ConsoleRoute::Login) => RouteDecision::RedirectToDashboard,
        (Some(_), route) => match route.required_capability() {
            Some(capability) if !can_access(role, capability) => {
                RouteDecision::RedirectToDashboard
            }
            _ => RouteDecision::Allow,
        },
    }
}

/// Sidebar entries for `role`, in display order.
#[must_use]
pub fn navigation(role: Option<Role>) -> Vec<ConsoleRoute> {
    if role.is_none() {
        return Vec::new();
    }

    ConsoleRoute::ALL
        .into_iter()
        .filter(|route| *route != ConsoleRoute::Login)
        .filter(|route| guard(role, *route) == RouteDecision::Allow)
        .collect()
}
