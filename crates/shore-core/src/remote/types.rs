use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { exit_code: 0, stdout: stdout.into(), stderr: String::new() }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self { exit_code, stdout: String::new(), stderr: stderr.into() }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Par remoto/local de un archivo a mover. En `transfer` el `local` es
/// relativo al directorio destino; en `upload` es la ruta local de origen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteFile {
    pub remote: String,
    pub local: PathBuf,
}

impl RemoteFile {
    pub fn new(remote: impl Into<String>, local: impl Into<PathBuf>) -> Self {
        Self { remote: remote.into(), local: local.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferStatus {
    Copied { bytes: u64 },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub remote: String,
    pub local: PathBuf,
    pub status: TransferStatus,
}

impl FileOutcome {
    pub fn is_copied(&self) -> bool {
        matches!(self.status, TransferStatus::Copied { .. })
    }
}

/// Resultado de una transferencia multi-archivo: un `FileOutcome` por archivo
/// pedido, en el mismo orden. Un fallo parcial no invalida los demás.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransferReport {
    pub outcomes: Vec<FileOutcome>,
}

impl TransferReport {
    pub fn push(&mut self, remote: &str, local: &Path, status: TransferStatus) {
        self.outcomes.push(FileOutcome { remote: remote.to_string(), local: local.to_path_buf(), status });
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| o.is_copied())
    }

    pub fn failed(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| !o.is_copied())
    }

    pub fn failed_paths(&self) -> Vec<String> {
        self.failed().map(|o| o.remote.clone()).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(FileOutcome::is_copied)
    }

    pub fn bytes(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|o| match o.status {
                TransferStatus::Copied { bytes } => bytes,
                TransferStatus::Failed { .. } => 0,
            })
            .sum()
    }
}

/// Sesión autenticada contra el entorno remoto.
///
/// Las implementaciones deben tolerar llamadas concurrentes desde varios
/// cálculos (la de SSH serializa con un mutex por llamada). Un timeout nunca
/// deja la sesión inutilizable.
pub trait RemoteSession: Send + Sync {
    fn host(&self) -> &str;

    /// Ejecuta un comando y espera a lo sumo `timeout`.
    fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput, OrchestratorError>;

    /// Descarga `files` bajo `local_dir`. El `Err` externo se reserva para
    /// fallos de la sesión; los fallos por archivo van en el reporte.
    fn transfer(&self,
                files: &[RemoteFile],
                local_dir: &Path,
                timeout: Duration)
                -> Result<TransferReport, OrchestratorError>;

    /// Sube archivos locales a sus rutas remotas.
    fn upload(&self, files: &[RemoteFile], timeout: Duration) -> Result<TransferReport, OrchestratorError>;

    /// Libera la sesión. Idempotente.
    fn close(&self) -> Result<(), OrchestratorError>;

    fn is_open(&self) -> bool;

    /// `execute` que convierte un exit code distinto de cero en
    /// `RemoteCommand`.
    fn execute_checked(&self, command: &str, timeout: Duration) -> Result<CommandOutput, OrchestratorError> {
        let out = self.execute(command, timeout)?;
        if out.success() {
            Ok(out)
        } else {
            Err(OrchestratorError::RemoteCommand { command: command.to_string(),
                                                   exit_code: out.exit_code,
                                                   stderr: out.stderr.trim().to_string() })
        }
    }
}
