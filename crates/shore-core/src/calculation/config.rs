use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuración explícita de un cálculo: dónde viven los archivos locales y
/// remotos, y los deadlines de cada llamada remota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalculationConfig {
    pub local_root: PathBuf,
    pub remote_root: String,
    pub command_timeout: Duration,
    pub transfer_timeout: Duration,
}

impl CalculationConfig {
    pub fn new(local_root: impl Into<PathBuf>, remote_root: &str) -> Self {
        Self { local_root: local_root.into(),
               remote_root: remote_root.trim_end_matches('/').to_string(),
               command_timeout: Duration::from_secs(60),
               transfer_timeout: Duration::from_secs(300) }
    }

    pub fn with_timeouts(mut self, command: Duration, transfer: Duration) -> Self {
        self.command_timeout = command;
        self.transfer_timeout = transfer;
        self
    }

    pub fn local_dir(&self, calculation: &str) -> PathBuf {
        self.local_root.join(calculation)
    }

    pub fn remote_dir(&self, calculation: &str, stage_dir: &str) -> String {
        if self.remote_root.is_empty() {
            format!("{calculation}/{stage_dir}")
        } else {
            format!("{}/{calculation}/{stage_dir}", self.remote_root)
        }
    }

    /// `<local_root>/.<name>_state.json`
    pub fn state_file(&self, calculation: &str) -> PathBuf {
        state_file_in(&self.local_root, calculation)
    }
}

pub(crate) fn state_file_in(root: &Path, calculation: &str) -> PathBuf {
    root.join(format!(".{calculation}_state.json"))
}
