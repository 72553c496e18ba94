use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ExecutionTarget, StageStatus};

/// Nodo del grafo de pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    /// Posición de inserción en el grafo (desempate del orden topológico).
    pub ordinal: usize,
    /// Stages que deben estar `Done` antes de que este pueda empezar.
    pub dependencies: Vec<String>,
    pub status: StageStatus,
    pub target: ExecutionTarget,
    /// Fingerprint del subconjunto de parámetros relevante (si ya se calculó).
    pub fingerprint: Option<String>,
    /// Directorio remoto donde viven los artifacts del stage.
    pub remote_dir: Option<String>,
    /// Stage (nombre calificado) cuyo resultado se adoptó en lugar de ejecutar.
    pub reused_from: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Descripción de un stage a insertar. `add_stage(name, deps)` es el atajo
/// para el caso remoto sin metadatos.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub name: String,
    pub dependencies: Vec<String>,
    pub target: ExecutionTarget,
    pub fingerprint: Option<String>,
    pub remote_dir: Option<String>,
}

impl StageSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(),
               dependencies: Vec::new(),
               target: ExecutionTarget::Remote,
               fingerprint: None,
               remote_dir: None }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn target(mut self, target: ExecutionTarget) -> Self {
        self.target = target;
        self
    }

    pub fn fingerprint(mut self, fp: impl Into<String>) -> Self {
        self.fingerprint = Some(fp.into());
        self
    }

    pub fn remote_dir(mut self, dir: impl Into<String>) -> Self {
        self.remote_dir = Some(dir.into());
        self
    }
}
