use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use super::CalculationState;
use crate::errors::OrchestratorError;
use crate::graph::StageStatus;
use crate::results::ResultsHandler;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReusedStage {
    pub stage: String,
    pub source: String,
}

/// Qué hizo un `run`. Los nombres son ids de stage (sin calificar).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub submitted: Vec<String>,
    pub completed_locally: Vec<String>,
    pub reused: Vec<ReusedStage>,
    pub reset: Vec<String>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn is_noop(&self) -> bool {
        self.submitted.is_empty() && self.completed_locally.is_empty() && self.reused.is_empty() && self.reset.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub stage: String,
    pub from: StageStatus,
    pub to: StageStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub changes: Vec<StatusChange>,
    pub state: CalculationState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievedArtifact {
    pub stage: String,
    pub file: String,
    pub local_path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedArtifact {
    pub stage: String,
    pub remote: String,
    pub reason: String,
}

/// Resultado de un `sync`: lo que se trajo en esta llamada, lo que falló y
/// los stages que todavía requieren otra pasada.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub retrieved: Vec<RetrievedArtifact>,
    pub failed: Vec<FailedArtifact>,
    pub outstanding_stages: Vec<String>,
    pub results: ResultsHandler,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.outstanding_stages.is_empty()
    }

    /// `PartialSync` con las rutas remotas que fallaron, si hubo alguna.
    pub fn partial_error(&self) -> Option<OrchestratorError> {
        if self.failed.is_empty() {
            None
        } else {
            Some(OrchestratorError::PartialSync { failed: self.failed.iter().map(|f| f.remote.clone()).collect() })
        }
    }
}

/// Archivos de diagnóstico de un stage: el contenido de los que se pudieron
/// traer y el motivo de los que no.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageDiagnostics {
    pub stage: String,
    pub files: BTreeMap<String, String>,
    pub missing: Vec<FailedArtifact>,
}

impl StageDiagnostics {
    pub fn file(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    /// Últimas `n` líneas no vacías de `name`.
    pub fn tail(&self, name: &str, n: usize) -> Vec<&str> {
        let lines: Vec<&str> = self.file(name)
                                   .map(|t| t.lines().map(str::trim_end).filter(|l| !l.trim().is_empty()).collect())
                                   .unwrap_or_default();
        lines[lines.len().saturating_sub(n)..].to_vec()
    }
}
