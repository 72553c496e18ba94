//! Carga de configuración desde variables de entorno.
//! Todas las claves usan el prefijo `SHORE_`; un `.env` en el directorio de
//! trabajo se lee una sola vez.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use once_cell::sync::Lazy;
use shore_core::calculation::CalculationConfig;
use shore_core::stage::Scheduler;
use thiserror::Error;

use crate::connection::SshOptions;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShoreConfig {
    /// Directorio local de trabajo (antes el "jar" implícito).
    pub local_root: PathBuf,
    pub remote_root: String,
    pub credential_path: PathBuf,
    pub ssh_program: String,
    pub scp_program: String,
    pub sshpass_program: String,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub transfer_timeout: Duration,
    pub scheduler: Scheduler,
    pub control_persist: Duration,
}

impl ShoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        // asegura que .env se haya cargado
        Lazy::force(&DOTENV_LOADED);
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env` pero leyendo de una función arbitraria.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
        where F: Fn(&str) -> Option<String>
    {
        let local_root = PathBuf::from(lookup("SHORE_LOCAL_ROOT").unwrap_or_else(|| "jar".to_string()));
        let credential_path = lookup("SHORE_CREDENTIAL").map(PathBuf::from)
                                                        .unwrap_or_else(|| local_root.join("credential.json"));
        let secs = |key: &str, default: u64| -> Result<Duration, ConfigError> {
            parsed(&lookup, key, default).map(Duration::from_secs)
        };
        let scheduler = match lookup("SHORE_SCHEDULER") {
            Some(v) => Scheduler::from_str(&v).map_err(|_| ConfigError::Invalid { key: "SHORE_SCHEDULER".into(), value: v })?,
            None => Scheduler::Slurm,
        };
        Ok(Self { remote_root: lookup("SHORE_REMOTE_ROOT").unwrap_or_else(|| "shore".to_string()),
                  credential_path,
                  ssh_program: lookup("SHORE_SSH_PROGRAM").unwrap_or_else(|| "ssh".to_string()),
                  scp_program: lookup("SHORE_SCP_PROGRAM").unwrap_or_else(|| "scp".to_string()),
                  sshpass_program: lookup("SHORE_SSHPASS_PROGRAM").unwrap_or_else(|| "sshpass".to_string()),
                  connect_timeout: secs("SHORE_CONNECT_TIMEOUT_SECS", 15)?,
                  command_timeout: secs("SHORE_COMMAND_TIMEOUT_SECS", 60)?,
                  transfer_timeout: secs("SHORE_TRANSFER_TIMEOUT_SECS", 300)?,
                  scheduler,
                  control_persist: secs("SHORE_CONTROL_PERSIST_SECS", 600)?,
                  local_root })
    }

    pub fn calculation_config(&self) -> CalculationConfig {
        CalculationConfig::new(&self.local_root, &self.remote_root).with_timeouts(self.command_timeout,
                                                                                   self.transfer_timeout)
    }

    pub fn ssh_options(&self) -> SshOptions {
        SshOptions { ssh_program: self.ssh_program.clone(),
                     scp_program: self.scp_program.clone(),
                     sshpass_program: self.sshpass_program.clone(),
                     connect_timeout: self.connect_timeout,
                     control_persist: self.control_persist,
                     ..SshOptions::default() }
    }
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
    where F: Fn(&str) -> Option<String>,
          T: FromStr
{
    match lookup(key) {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid { key: key.to_string(), value: v }),
    }
}

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}
