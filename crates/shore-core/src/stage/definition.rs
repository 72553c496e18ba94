use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::LOG_FILE;
use crate::errors::OrchestratorError;
use crate::graph::{ExecutionTarget, StageStatus};
use crate::input::{InputSpecification, Vocabulary};
use crate::remote::CommandOutput;

/// Todo lo que un stage necesita saber para preparar y enviar su trabajo.
#[derive(Debug, Clone)]
pub struct StageContext<'a> {
    pub calculation: &'a str,
    pub stage: &'a str,
    pub input: &'a InputSpecification,
    /// Directorio local del stage (`<local_root>/<calc>/<dir>`).
    pub local_dir: PathBuf,
    /// Directorio remoto del stage (`<remote_root>/<calc>/<dir>`).
    pub remote_dir: String,
    /// id de dependencia -> directorio remoto donde quedaron sus artifacts.
    /// Para un stage reutilizado es el directorio de la fuente.
    pub upstream_dirs: BTreeMap<String, String>,
}

/// Identificador de un job enviado al scheduler remoto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
    pub submitted_at: DateTime<Utc>,
}

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), submitted_at: Utc::now() }
    }
}

/// Estado de un job tal como lo reporta el entorno remoto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteJobState {
    Queued,
    Running,
    Completed,
    Failed(String),
    /// El sondeo no pudo determinar nada; el stage queda como estaba.
    Unknown,
}

impl RemoteJobState {
    pub fn as_stage_status(&self) -> Option<StageStatus> {
        match self {
            Self::Queued => Some(StageStatus::Submitted),
            Self::Running => Some(StageStatus::Running),
            Self::Completed => Some(StageStatus::Done),
            Self::Failed(_) => Some(StageStatus::Failed),
            Self::Unknown => None,
        }
    }
}

/// Trait que define un stage de pipeline.
///
/// Las implementaciones deben ser deterministas respecto a `input` y a
/// `signature()`: dos cálculos con el mismo fingerprint producen el mismo
/// resultado y por eso uno puede adoptar el del otro.
pub trait StageDefinition: Send + Sync {
    /// Identificador estable y único dentro del plan.
    fn id(&self) -> &str;

    /// Nombre del directorio del stage (local y remoto).
    fn directory(&self) -> &str {
        self.id()
    }

    /// ids de los stages del mismo plan que deben terminar antes.
    fn dependencies(&self) -> Vec<String>;

    fn target(&self) -> ExecutionTarget {
        ExecutionTarget::Remote
    }

    /// Claves del input que influyen en el resultado de este stage.
    fn relevant_params(&self, vocabulary: &Vocabulary) -> Vec<String>;

    /// Identidad de la definición (comando, versión del solver...). Entra en
    /// el fingerprint.
    fn signature(&self) -> Value {
        json!({ "id": self.id() })
    }

    /// Escribe los inputs locales del stage y devuelve las rutas (relativas a
    /// `ctx.local_dir`) que hay que subir.
    fn prepare(&self, ctx: &StageContext) -> Result<Vec<PathBuf>, OrchestratorError>;

    /// Ejecución síncrona de un stage `Local`.
    fn run_local(&self, _ctx: &StageContext) -> Result<(), OrchestratorError> {
        Ok(())
    }

    fn submit_command(&self, ctx: &StageContext) -> String;

    fn parse_submission(&self, output: &CommandOutput) -> Result<JobHandle, OrchestratorError>;

    fn status_command(&self, ctx: &StageContext, job: &JobHandle) -> String;

    fn parse_status(&self, output: &CommandOutput) -> RemoteJobState;

    /// Archivos que produce el stage, relativos a su directorio remoto.
    fn artifacts(&self, ctx: &StageContext) -> Vec<String>;

    /// Archivos para diagnosticar el stage (log, salida del scheduler). Se
    /// pueden traer en cualquier estado, también si falló.
    fn diagnostic_files(&self) -> Vec<String> {
        vec![LOG_FILE.to_string()]
    }
}
