use anyhow::{Context, Result};
use clap::{Arg, Command};
use std::{env, path::PathBuf, time::Duration};

pub const ARG_SESSION_FILE: &str = "session-file";
pub const ARG_SESSION_TTL: &str = "session-ttl";
pub const ARG_MAX_MFA_ATTEMPTS: &str = "max-mfa-attempts";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_FILE)
                .long("session-file")
                .help("Where the session is kept between runs (default: $HOME/.opsgate/session.json)")
                .env("OPSGATE_SESSION_FILE")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long("session-ttl")
                .help("Local session lifetime in minutes, 0 disables local expiry")
                .env("OPSGATE_SESSION_TTL")
                .global(true)
                .default_value("30")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_MAX_MFA_ATTEMPTS)
                .long("max-mfa-attempts")
                .help("Wrong verification codes allowed per login, 0 for unlimited")
                .env("OPSGATE_MAX_MFA_ATTEMPTS")
                .global(true)
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub session_file: PathBuf,
    pub session_ttl: Option<Duration>,
    pub max_mfa_attempts: u32,
}

impl Options {
    /// # Errors
    /// Returns an error if no session file was given and `HOME` is unset.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let session_file = match matches.get_one::<PathBuf>(ARG_SESSION_FILE) {
            Some(path) => path.clone(),
            None => default_session_file()?,
        };

        let session_ttl = match matches.get_one::<u64>(ARG_SESSION_TTL).copied().unwrap_or(30) {
            0 => None,
            minutes => Some(Duration::from_secs(minutes * 60)),
        };

        Ok(Self {
            session_file,
            session_ttl,
            max_mfa_attempts: matches
                .get_one::<u32>(ARG_MAX_MFA_ATTEMPTS)
                .copied()
                .unwrap_or(5),
        })
    }
}

fn default_session_file() -> Result<PathBuf> {
    let home = env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .context("HOME is not set, pass --session-file or OPSGATE_SESSION_FILE")?;

    Ok(PathBuf::from(home).join(".opsgate").join("session.json"))
}
