use crate::{api::ConsoleApi, cli::globals::GlobalArgs};
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Vms,
    VmAccess(String),
    Logs,
    Alerts,
    Profile,
    MfaSetup,
    MfaEnable(String),
}

/// Execute a console API request and print the JSON reply.
///
/// # Errors
/// Returns an error if the request is denied, the session is rejected, or the
/// server fails.
pub async fn execute(globals: &GlobalArgs, request: Request) -> Result<()> {
    let controller = Arc::new(globals.controller()?);
    let api = ConsoleApi::new(globals.api_url.clone(), globals.timeout, controller)?;

    let reply = match &request {
        Request::Vms => api.vms().await?,
        Request::VmAccess(id) => api.vm_access(id).await?,
        Request::Logs => api.logs().await?,
        Request::Alerts => api.alerts().await?,
        Request::Profile => api.profile().await?,
        Request::MfaSetup => serde_json::to_value(api.setup_mfa().await?)?,
        Request::MfaEnable(code) => Value::Bool(api.enable_mfa(code).await?),
    };

    println!("{}", serde_json::to_string_pretty(&reply)?);

    Ok(())
}
