use crate::{
    auth::AuthSnapshot,
    cli::globals::GlobalArgs,
    gate::{routes::navigation, AccessLevel, Capability},
};
use anyhow::Result;
use std::fmt::Write;

/// # Errors
/// Returns an error if the stored session could not be removed.
pub fn logout(globals: &GlobalArgs) -> Result<()> {
    globals.controller()?.logout()?;
    println!("Signed out");
    Ok(())
}

/// # Errors
/// Returns an error if the controller cannot be built.
pub fn status(globals: &GlobalArgs) -> Result<()> {
    let controller = globals.controller()?;
    controller.check_expiry();
    print!("{}", render_status(&controller.snapshot()));
    Ok(())
}

/// # Errors
/// Returns an error if the controller cannot be built.
pub fn can(globals: &GlobalArgs, capability: Capability) -> Result<()> {
    let controller = globals.controller()?;
    controller.check_expiry();
    println!("{}", verdict(&controller.snapshot(), capability));
    Ok(())
}

/// # Errors
/// Returns an error if the controller cannot be built.
pub fn routes(globals: &GlobalArgs) -> Result<()> {
    let controller = globals.controller()?;
    controller.check_expiry();
    print!("{}", render_routes(&controller.snapshot()));
    Ok(())
}

#[must_use]
pub fn verdict(snapshot: &AuthSnapshot, capability: Capability) -> &'static str {
    if snapshot.can_access(capability) {
        "allow"
    } else {
        "deny"
    }
}

#[must_use]
pub fn render_status(snapshot: &AuthSnapshot) -> String {
    let mut out = String::new();

    let Some(identity) = snapshot.identity() else {
        out.push_str("Not signed in\n");
        if let Some(error) = &snapshot.error {
            let _ = writeln!(out, "Last error: {error}");
        }
        return out;
    };

    let capabilities: Vec<String> = snapshot
        .visible_capabilities()
        .into_iter()
        .map(|capability| match snapshot.access_level(capability) {
            Some(level) if level != AccessLevel::Full => {
                format!("{capability} ({level})")
            }
            _ => capability.to_string(),
        })
        .collect();

    let _ = writeln!(out, "Signed in as {} <{}>", identity.username, identity.email);
    let _ = writeln!(out, "Role: {}", identity.role);
    let _ = writeln!(out, "Capabilities: {}", capabilities.join(", "));
    out
}

#[must_use]
pub fn render_routes(snapshot: &AuthSnapshot) -> String {
    navigation(snapshot.role())
        .into_iter()
        .fold(String::new(), |mut out, route| {
            let _ = writeln!(out, "{:<12} {}", route.path(), route.title());
            out
        })
}
