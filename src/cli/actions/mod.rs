pub mod console;
pub mod login;
pub mod session;

use crate::{cli::globals::GlobalArgs, gate::Capability};
use anyhow::Result;

#[derive(Debug)]
pub enum Command {
    Login(login::Args),
    Logout,
    Status,
    Can(Capability),
    Routes,
    Console(console::Request),
}

#[derive(Debug)]
pub struct Action {
    pub globals: GlobalArgs,
    pub command: Command,
}

impl Action {
    /// Runs the subcommand against the persisted session.
    ///
    /// # Errors
    /// Returns an error if the subcommand fails.
    pub async fn execute(self) -> Result<()> {
        let globals = &self.globals;

        match self.command {
            Command::Login(args) => login::execute(globals, args).await,
            Command::Logout => session::logout(globals),
            Command::Status => session::status(globals),
            Command::Can(capability) => session::can(globals, capability),
            Command::Routes => session::routes(globals),
            Command::Console(request) => console::execute(globals, request).await,
        }
    }
}
