//! shore-remote: credenciales y conexión SSH al entorno remoto.
pub mod config;
pub mod connection;
pub mod credential;
pub mod runner;

pub use config::{init_dotenv, ConfigError, ShoreConfig};
pub use connection::{Connection, SshOptions};
pub use credential::{create, persist, restore, Credential, CredentialStore, Secret, CREDENTIAL_FORMAT_VERSION};
pub use runner::{CommandRunner, Invocation, ProcessRunner, RecordingRunner, RunnerError};
