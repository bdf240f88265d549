use anyhow::{Context, Result};
use clap::{Arg, Command};
use std::time::Duration;
use url::Url;

pub const ARG_API_URL: &str = "api-url";
pub const ARG_TIMEOUT: &str = "timeout";

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_API_URL)
                .long("api-url")
                .help("Console API base URL")
                .env("OPSGATE_API_URL")
                .global(true)
                .default_value(DEFAULT_API_URL),
        )
        .arg(
            Arg::new(ARG_TIMEOUT)
                .long("timeout")
                .help("Request timeout in seconds")
                .env("OPSGATE_TIMEOUT")
                .global(true)
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub api_url: Url,
    pub timeout: Duration,
}

impl Options {
    /// # Errors
    /// Returns an error if the API URL is not an absolute http(s) URL.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let raw = matches
            .get_one::<String>(ARG_API_URL)
            .context("missing required argument: --api-url")?;

        let api_url = Url::parse(raw).with_context(|| format!("invalid OPSGATE_API_URL: {raw}"))?;

        if !matches!(api_url.scheme(), "http" | "https") {
            anyhow::bail!("OPSGATE_API_URL must be http or https, got: {raw}");
        }

        let timeout = matches.get_one::<u64>(ARG_TIMEOUT).copied().unwrap_or(10);

        Ok(Self {
            api_url,
            timeout: Duration::from_secs(timeout),
        })
    }
}
