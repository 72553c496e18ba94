use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "shore",
          version,
          about = "Run multi-stage core-level spectroscopy calculations on a remote cluster.")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only report errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage the saved connection credential.
    #[command(subcommand)]
    Credential(CredentialCommand),
    /// Poll in-flight stages and submit every stage that became ready.
    Run(RunArgs),
    /// Poll the remote scheduler and print the stage table.
    Status(InputArgs),
    /// Retrieve the artifacts of finished stages and load the spectra.
    Sync(InputArgs),
    /// Derive a new input file from an existing one.
    Fork(ForkArgs),
    /// Print the solver input generated for an input file.
    Render(InputArgs),
}

#[derive(Subcommand, Debug)]
pub enum CredentialCommand {
    /// Write the credential snapshot (SHORE_CREDENTIAL).
    Save(CredentialSaveArgs),
    /// Open a session with the saved credential and close it again.
    Check,
}

#[derive(Args, Debug)]
pub struct CredentialSaveArgs {
    #[arg(long)]
    pub host: String,

    #[arg(long)]
    pub user: String,

    #[arg(long)]
    pub port: Option<u16>,

    /// Private key to authenticate with
    #[arg(long, value_name = "PATH", conflicts_with = "password_env")]
    pub identity: Option<PathBuf>,

    /// Environment variable holding the password
    #[arg(long, value_name = "VAR")]
    pub password_env: Option<String>,
}

#[derive(Args, Debug)]
pub struct InputArgs {
    /// Input file (`{"name": ..., "params": {...}}`)
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Discard previous progress and equivalent results of other calculations
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Args, Debug)]
pub struct ForkArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Name of the derived calculation
    #[arg(long)]
    pub name: String,

    /// Parameter override; VALUE is parsed as JSON, falling back to a string
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,

    /// Where to write the new input file (default: `<name>.json` next to INPUT)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}
