use crate::{
    auth::{
        AuthState, Credentials, Identity, IdentityProvider, LoginStep, SessionController,
        SessionStore,
    },
    cli::globals::GlobalArgs,
};
use anyhow::{bail, Result};
use secrecy::{ExposeSecret, SecretString};
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub username: String,
    pub password: SecretString,
    pub code: Option<String>,
}

/// Execute the login action.
///
/// # Errors
/// Returns an error if the login is rejected, cancelled, or cannot be
/// persisted.
pub async fn execute(globals: &GlobalArgs, args: Args) -> Result<()> {
    let controller = globals.controller()?;
    let identity = authenticate(&controller, args, BufReader::new(tokio::io::stdin())).await?;

    println!("Signed in as {} ({})", identity.username, identity.role);

    Ok(())
}

/// Drives a full login. Codes are read line by line from `codes` until one is
/// accepted, the attempt budget runs out, or the input ends.
///
/// # Errors
/// Returns the controller's error when the login cannot proceed, or an error
/// when `codes` is exhausted first.
pub async fn authenticate<P, S, R>(
    controller: &SessionController<P, S>,
    args: Args,
    codes: R,
) -> Result<Identity>
where
    P: IdentityProvider,
    S: SessionStore,
    R: AsyncBufRead + Unpin,
{
    let credentials = Credentials::new(args.username, args.password.expose_secret());

    if let LoginStep::Authenticated(identity) = controller.submit_credentials(credentials).await? {
        return Ok(identity);
    }

    if let Some(code) = args.code {
        return Ok(controller.submit_code(code.trim()).await?);
    }

    let mut lines = codes.lines();

    loop {
        prompt();

        let Some(line) = lines.next_line().await? else {
            debug!("code input closed");
            controller.cancel();
            bail!("login cancelled");
        };

        match controller.submit_code(line.trim()).await {
            Ok(identity) => return Ok(identity),
            Err(err) if matches!(controller.snapshot().state, AuthState::MfaPending { .. }) => {
                eprintln!("{err}");
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn prompt() {
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "Verification code: ");
    let _ = stderr.flush();
}
