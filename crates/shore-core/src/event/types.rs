//! Eventos de un cálculo.
//!
//! Cada acción del driver (envío, cambio de estado, transferencia) se agrega a
//! un `EventStore` append-only. El log es observabilidad: el estado
//! persistido vive en el `CalculationRecord`.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calculation::CalculationState;
use crate::graph::StageStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CalculationEventKind {
    /// Primer evento de un cálculo: fija el hash del plan y el input.
    Registered { name: String, definition_hash: String, input_id: Uuid },
    /// Un stage adoptó el resultado `Done` de otro con el mismo fingerprint.
    StageReused { stage: String, source: String, fingerprint: String },
    StageSubmitted { stage: String, job_id: String, remote_dir: String },
    StageCompletedLocally { stage: String },
    StageStatusChanged { stage: String, from: StageStatus, to: StageStatus },
    /// Reset forzado por `overwrite`.
    StageReset { stages: Vec<String> },
    ArtifactsRetrieved { stage: String, files: Vec<String>, bytes: u64 },
    ArtifactTransferFailed { stage: String, file: String, reason: String },
    StateChanged { from: CalculationState, to: CalculationState },
    RunCancelled { submitted: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationEvent {
    pub seq: u64, // asignado por el store (orden append)
    pub calculation_id: Uuid,
    pub kind: CalculationEventKind,
    pub ts: DateTime<Utc>,
}
