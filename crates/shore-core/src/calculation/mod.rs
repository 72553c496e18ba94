//! Calculation: un input + un plan de stages sobre un `Pipeline` compartido.
//!
//! Rol en el flujo:
//! - `new` registra los stages del plan en el grafo compartido con nombres
//!   calificados `<calc>/<stage>` y calcula el fingerprint de cada uno.
//! - `run` envía la frontera lista (o adopta resultados equivalentes de otros
//!   cálculos), `get_status` sondea sin bloquear y `sync` trae artifacts de
//!   forma incremental.
//! - `save_state` / `resume` persisten lo necesario para retomar el ciclo en
//!   otra invocación.
//!
//! El cálculo no es dueño de la conexión: la comparte vía `Pipeline`.

mod config;
mod diagnostics;
mod driver;
mod record;
mod report;
mod state;
mod sync;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use serde_json::json;
use uuid::Uuid;

pub use config::CalculationConfig;
pub use driver::RunOptions;
pub use record::{changed_stages, CalculationRecord, StageRecord};
pub use report::{FailedArtifact, ReusedStage, RetrievedArtifact, RunReport, StageDiagnostics, StatusChange, StatusReport,
                 SyncReport};
pub use state::CalculationState;

use crate::constants::{ENGINE_VERSION, STAGE_SEPARATOR};
use crate::errors::OrchestratorError;
use crate::event::{CalculationEvent, CalculationEventKind, EventStore, InMemoryEventStore};
use crate::graph::{Stage, StageSpec, StageStatus};
use crate::hashing::hash_value;
use crate::input::InputSpecification;
use crate::pipeline::Pipeline;
use crate::stage::{JobHandle, PipelinePlan, StageContext, StageDefinition};

pub struct Calculation<E: EventStore = InMemoryEventStore> {
    id: Uuid,
    input: InputSpecification,
    plan: PipelinePlan,
    pipeline: Arc<Pipeline>,
    config: CalculationConfig,
    state: CalculationState,
    /// stage id -> job enviado.
    jobs: BTreeMap<String, JobHandle>,
    /// `<stage>/<archivo>` ya descargados.
    retrieved: BTreeSet<String>,
    event_store: E,
}

impl Calculation<InMemoryEventStore> {
    pub fn new(input: InputSpecification,
               plan: PipelinePlan,
               pipeline: Arc<Pipeline>,
               config: CalculationConfig)
               -> Result<Self, OrchestratorError> {
        Self::with_event_store(input, plan, pipeline, config, InMemoryEventStore::default())
    }
}

/// Fingerprint de cada stage del plan para este input, en orden topológico.
pub fn stage_fingerprints(input: &InputSpecification, plan: &PipelinePlan) -> BTreeMap<String, String> {
    let mut fps: BTreeMap<String, String> = BTreeMap::new();
    for def in plan.stages() {
        let params = input.fingerprint(&def.relevant_params(input.vocabulary()));
        let upstream: Vec<String> = def.dependencies()
                                       .iter()
                                       .map(|d| fps.get(d).cloned().unwrap_or_default())
                                       .collect();
        let fp = hash_value(&json!({
                                "engine_version": ENGINE_VERSION,
                                "stage": def.id(),
                                "signature": def.signature(),
                                "params": params,
                                "upstream": upstream,
                            }));
        fps.insert(def.id().to_string(), fp);
    }
    fps
}

impl<E: EventStore> Calculation<E> {
    pub fn with_event_store(input: InputSpecification,
                            plan: PipelinePlan,
                            pipeline: Arc<Pipeline>,
                            config: CalculationConfig,
                            event_store: E)
                            -> Result<Self, OrchestratorError> {
        Self::build(Uuid::new_v4(), input, plan, pipeline, config, event_store)
    }

    fn build(id: Uuid,
             input: InputSpecification,
             plan: PipelinePlan,
             pipeline: Arc<Pipeline>,
             config: CalculationConfig,
             event_store: E)
             -> Result<Self, OrchestratorError> {
        let mut calc = Self { id,
                              input,
                              plan,
                              pipeline,
                              config,
                              state: CalculationState::NotStarted,
                              jobs: BTreeMap::new(),
                              retrieved: BTreeSet::new(),
                              event_store };
        calc.register()?;
        let kind = CalculationEventKind::Registered { name: calc.name().to_string(),
                                                      definition_hash: calc.plan.definition_hash().to_string(),
                                                      input_id: calc.input.id() };
        calc.event_store.append_kind(calc.id, kind);
        Ok(calc)
    }

    /// Inserta los stages del plan en el grafo. Todo o nada: si algún nombre
    /// calificado ya existe no se inserta ninguno.
    fn register(&mut self) -> Result<(), OrchestratorError> {
        let fps = stage_fingerprints(&self.input, &self.plan);
        let specs: Vec<StageSpec> = self.plan
                                        .stages()
                                        .iter()
                                        .map(|def| {
                                            let mut spec = StageSpec::new(self.qualified(def.id()))
                                                .depends_on(def.dependencies().iter().map(|d| self.qualified(d)))
                                                .target(def.target());
                                            if let Some(fp) = fps.get(def.id()) {
                                                spec = spec.fingerprint(fp.clone());
                                            }
                                            spec
                                        })
                                        .collect();
        self.pipeline.with_graph(|g| {
                         if let Some(dup) = specs.iter().find(|s| g.contains(&s.name)) {
                             return Err(OrchestratorError::DuplicateStage(dup.name.clone()));
                         }
                         for spec in specs {
                             g.add_stage_with(spec)?;
                         }
                         Ok(())
                     })?;
        info!("calculation {}: registered {} stage(s)", self.name(), self.plan.stages().len());
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        self.input.name()
    }

    pub fn input(&self) -> &InputSpecification {
        &self.input
    }

    pub fn plan(&self) -> &PipelinePlan {
        &self.plan
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn config(&self) -> &CalculationConfig {
        &self.config
    }

    pub fn state(&self) -> CalculationState {
        self.state
    }

    pub fn job(&self, stage: &str) -> Option<&JobHandle> {
        self.jobs.get(stage)
    }

    /// Directorio local de trabajo del cálculo.
    pub fn local_dir(&self) -> PathBuf {
        self.config.local_dir(self.name())
    }

    pub fn events(&self) -> Vec<CalculationEvent> {
        self.event_store.list(self.id)
    }

    /// Nombre en el grafo compartido: `<calc>/<stage>`.
    pub fn qualified(&self, stage: &str) -> String {
        format!("{}{}{}", self.input.name(), STAGE_SEPARATOR, stage)
    }

    fn prefix(&self) -> String {
        format!("{}{}", self.input.name(), STAGE_SEPARATOR)
    }

    /// Copia del nodo de grafo de un stage propio.
    pub fn stage(&self, stage: &str) -> Option<Stage> {
        let q = self.qualified(stage);
        self.pipeline.with_graph(|g| g.stage(&q).cloned())
    }

    pub fn stage_status(&self, stage: &str) -> Option<StageStatus> {
        self.pipeline.status_of(&self.qualified(stage))
    }

    /// Estado de cada stage propio, en orden del plan.
    pub fn stage_statuses(&self) -> Vec<(String, StageStatus)> {
        self.plan
            .stages()
            .iter()
            .filter_map(|d| self.stage_status(d.id()).map(|s| (d.id().to_string(), s)))
            .collect()
    }

    fn definition(&self, stage: &str) -> Result<Arc<dyn StageDefinition>, OrchestratorError> {
        self.plan
            .get(stage)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownStage(stage.to_string()))
    }

    /// Directorio remoto efectivo de un stage: el registrado en el grafo
    /// (propio o de la fuente reutilizada) o el que le corresponde por
    /// configuración.
    fn remote_dir_of(&self, stage: &str) -> String {
        let own = self.plan
                      .get(stage)
                      .map(|d| self.config.remote_dir(self.name(), d.directory()))
                      .unwrap_or_else(|| self.config.remote_dir(self.name(), stage));
        self.stage(stage).and_then(|s| s.remote_dir).unwrap_or(own)
    }

    fn context<'a>(&'a self, def: &'a dyn StageDefinition) -> StageContext<'a> {
        let upstream_dirs = def.dependencies()
                               .into_iter()
                               .map(|d| {
                                   let dir = self.remote_dir_of(&d);
                                   (d, dir)
                               })
                               .collect();
        StageContext { calculation: self.input.name(),
                       stage: def.id(),
                       input: &self.input,
                       local_dir: self.local_dir().join(def.directory()),
                       remote_dir: self.remote_dir_of(def.id()),
                       upstream_dirs }
    }

    fn record_event(&mut self, kind: CalculationEventKind) {
        self.event_store.append_kind(self.id, kind);
    }

    fn transition(&mut self, to: CalculationState) {
        if self.state != to {
            info!("calculation {}: {} -> {}", self.name(), self.state, to);
            let from = self.state;
            self.state = to;
            self.record_event(CalculationEventKind::StateChanged { from, to });
        }
    }

    /// Recalcula el estado agregado a partir de los stages propios.
    fn settle_state(&mut self) {
        let statuses = self.stage_statuses();
        if statuses.iter().any(|(_, s)| *s == StageStatus::Failed) {
            self.transition(CalculationState::Failed);
            return;
        }
        let current = self.state;
        let syncing = matches!(current, CalculationState::Syncing | CalculationState::Complete);
        if syncing && statuses.iter().all(|(_, s)| *s == StageStatus::Done) && self.outstanding_artifacts() == 0 {
            self.transition(CalculationState::Complete);
            return;
        }
        match current {
            CalculationState::Syncing | CalculationState::Complete => {}
            _ if statuses.iter().any(|(_, s)| *s != StageStatus::Pending) => {
                self.transition(CalculationState::AwaitingRemote)
            }
            _ => {}
        }
    }

    /// Archivos de stages `Done` aún no descargados.
    fn outstanding_artifacts(&self) -> usize {
        self.plan
            .stages()
            .iter()
            .filter(|d| self.stage_status(d.id()) == Some(StageStatus::Done))
            .map(|d| {
                let ctx = self.context(d.as_ref());
                d.artifacts(&ctx)
                 .iter()
                 .filter(|f| !self.retrieved.contains(&format!("{}/{}", d.id(), f)))
                 .count()
            })
            .sum()
    }
}

impl<E: EventStore> std::fmt::Debug for Calculation<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Calculation")
         .field("id", &self.id)
         .field("name", &self.name())
         .field("state", &self.state)
         .field("jobs", &self.jobs)
         .finish()
    }
}
