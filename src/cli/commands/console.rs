use crate::gate::Capability;
use clap::{Arg, Command};

pub const CMD_LOGIN: &str = "login";
pub const CMD_LOGOUT: &str = "logout";
pub const CMD_STATUS: &str = "status";
pub const CMD_CAN: &str = "can";
pub const CMD_ROUTES: &str = "routes";
pub const CMD_VMS: &str = "vms";
pub const CMD_VM_ACCESS: &str = "vm-access";
pub const CMD_LOGS: &str = "logs";
pub const CMD_ALERTS: &str = "alerts";
pub const CMD_PROFILE: &str = "profile";
pub const CMD_MFA_SETUP: &str = "mfa-setup";
pub const CMD_MFA_ENABLE: &str = "mfa-enable";

pub const ARG_USERNAME: &str = "username";
pub const ARG_PASSWORD: &str = "password";
pub const ARG_CODE: &str = "code";
pub const ARG_CAPABILITY: &str = "capability";
pub const ARG_VM_ID: &str = "vm-id";

fn login() -> Command {
    Command::new(CMD_LOGIN)
        .about("Sign in with username, password and verification code")
        .arg(
            Arg::new(ARG_USERNAME)
                .short('u')
                .long("username")
                .help("Account name")
                .env("OPSGATE_USERNAME")
                .required(true),
        )
        .arg(
            Arg::new(ARG_PASSWORD)
                .short('p')
                .long("password")
                .help("Account password")
                .env("OPSGATE_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_CODE)
                .short('c')
                .long("code")
                .help("Six-digit verification code; prompted for when omitted"),
        )
}

fn can() -> Command {
    let names: Vec<&'static str> = Capability::ALL.iter().map(|c| c.as_str()).collect();

    Command::new(CMD_CAN)
        .about("Check whether the current session holds a capability")
        .arg(
            Arg::new(ARG_CAPABILITY)
                .help("Capability name")
                .required(true)
                .value_parser(names),
        )
}

fn mfa_enable() -> Command {
    Command::new(CMD_MFA_ENABLE)
        .about("Turn on two-factor sign-in with a code from the new authenticator")
        .arg(
            Arg::new(ARG_CODE)
                .short('c')
                .long("code")
                .help("Six-digit code shown by the authenticator")
                .required(true),
        )
}

#[must_use]
pub fn with_subcommands(command: Command) -> Command {
    command
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(login())
        .subcommand(Command::new(CMD_LOGOUT).about("Sign out and forget the stored session"))
        .subcommand(Command::new(CMD_STATUS).about("Show the current session"))
        .subcommand(can())
        .subcommand(Command::new(CMD_ROUTES).about("List the console pages this session can open"))
        .subcommand(Command::new(CMD_VMS).about("List virtual machines"))
        .subcommand(
            Command::new(CMD_VM_ACCESS)
                .about("Request SSH access to a virtual machine")
                .arg(Arg::new(ARG_VM_ID).help("Virtual machine id").required(true)),
        )
        .subcommand(Command::new(CMD_LOGS).about("Show audit logs"))
        .subcommand(Command::new(CMD_ALERTS).about("Show security alerts"))
        .subcommand(Command::new(CMD_PROFILE).about("Show the signed-in user's profile"))
        .subcommand(
            Command::new(CMD_MFA_SETUP)
                .about("Start authenticator enrollment and print its secret and QR code URL"),
        )
        .subcommand(mfa_enable())
}
