//! Taxonomía de errores del orquestador.
//!
//! Un único enum para todo el workspace: los errores de conexión y de
//! ejecución remota se propagan sin modificar hasta el caller, los errores de
//! bookkeeping local (ciclos, duplicados, parámetros desconocidos) fallan en
//! la llamada que los introdujo.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::StageStatus;

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum OrchestratorError {
    #[error("authentication rejected for {user}@{host}: {reason}")]
    Authentication { host: String, user: String, reason: String },
    #[error("host unreachable: {host}: {reason}")]
    UnreachableHost { host: String, reason: String },
    #[error("command timed out after {timeout_ms} ms: {command}")]
    CommandTimeout { command: String, timeout_ms: u64 },
    #[error("adding stage '{stage}' would create a dependency cycle")]
    CyclicDependency { stage: String },
    #[error("stage '{0}' already exists")]
    DuplicateStage(String),
    #[error("unknown stage '{0}'")]
    UnknownStage(String),
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("corrupt credential snapshot: {0}")]
    CorruptCredential(String),
    #[error("partial sync: {} file(s) failed", failed.len())]
    PartialSync { failed: Vec<String> },
    #[error("invalid status transition for '{stage}': {from:?} -> {to:?}")]
    InvalidTransition { stage: String, from: StageStatus, to: StageStatus },
    #[error("remote command exited with {exit_code}: {stderr}")]
    RemoteCommand { command: String, exit_code: i32, stderr: String },
    #[error("run cancelled before any remote command was issued")]
    Cancelled,
    #[error("io: {0}")]
    Io(String),
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Errores que el caller puede reintentar sin riesgo de dejar el grafo
    /// inconsistente. El orquestador nunca reintenta por su cuenta.
    pub fn is_retryable(&self) -> bool {
        matches!(self,
                 Self::UnreachableHost { .. }
                 | Self::CommandTimeout { .. }
                 | Self::PartialSync { .. }
                 | Self::RemoteCommand { .. })
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::CorruptSnapshot(err.to_string())
    }
}
