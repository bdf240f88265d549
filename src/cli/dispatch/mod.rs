//! Maps parsed arguments onto an [`Action`].

use crate::{
    cli::{
        actions::{console::Request, login, Action, Command},
        commands::{connection, console, session},
        globals::GlobalArgs,
    },
    gate::Capability,
};
use anyhow::{anyhow, Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let (name, sub) = matches.subcommand().context("missing subcommand")?;

    // global args are propagated down to the subcommand
    let connection = connection::Options::parse(sub)?;
    let session = session::Options::parse(sub)?;

    let globals = GlobalArgs {
        api_url: connection.api_url,
        timeout: connection.timeout,
        session_file: session.session_file,
        session_ttl: session.session_ttl,
        max_mfa_attempts: session.max_mfa_attempts,
    };

    let command = match name {
        console::CMD_LOGIN => Command::Login(login::Args {
            username: required(sub, console::ARG_USERNAME)?,
            password: SecretString::from(required(sub, console::ARG_PASSWORD)?),
            code: sub.get_one::<String>(console::ARG_CODE).cloned(),
        }),
        console::CMD_LOGOUT => Command::Logout,
        console::CMD_STATUS => Command::Status,
        console::CMD_CAN => {
            let capability = required(sub, console::ARG_CAPABILITY)?
                .parse::<Capability>()
                .map_err(|e| anyhow!(e))?;
            Command::Can(capability)
        }
        console::CMD_ROUTES => Command::Routes,
        console::CMD_VMS => Command::Console(Request::Vms),
        console::CMD_VM_ACCESS => Command::Console(Request::VmAccess(required(sub, console::ARG_VM_ID)?)),
        console::CMD_LOGS => Command::Console(Request::Logs),
        console::CMD_ALERTS => Command::Console(Request::Alerts),
        console::CMD_PROFILE => Command::Console(Request::Profile),
        console::CMD_MFA_SETUP => Command::Console(Request::MfaSetup),
        console::CMD_MFA_ENABLE => {
            Command::Console(Request::MfaEnable(required(sub, console::ARG_CODE)?))
        }
        other => return Err(anyhow!("unknown subcommand: {other}")),
    };

    Ok(Action { globals, command })
}

fn required(matches: &clap::ArgMatches, id: &str) -> Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .with_context(|| format!("missing required argument: --{id}"))
}
