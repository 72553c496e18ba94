mod cli;
mod commands;
mod logging;

use anyhow::Result;
use clap::Parser;
use log::debug;
use shore_remote::ShoreConfig;

use crate::cli::{Cli, Commands, CredentialCommand};
use crate::commands::Workspace;

fn main() {
    if let Err(e) = run_app() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run_app() -> Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose, cli.quiet);
    let config = ShoreConfig::from_env()?;
    debug!("configuration: {config:?}");

    match cli.command {
        Commands::Credential(CredentialCommand::Save(args)) => commands::credential_save(&config, args),
        Commands::Credential(CredentialCommand::Check) => commands::credential_check(&config),
        Commands::Run(args) => commands::run(&Workspace::new(config), args),
        Commands::Status(args) => commands::status(&Workspace::new(config), args),
        Commands::Sync(args) => commands::sync(&Workspace::new(config), args),
        Commands::Fork(args) => commands::fork(&Workspace::new(config), args).map(|_| ()),
        Commands::Render(args) => commands::render(&Workspace::new(config), args),
    }
}
