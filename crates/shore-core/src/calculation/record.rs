//! Persistencia del estado de un cálculo entre invocaciones.
//!
//! El snapshot guarda identidad, input, estado agregado, estado por stage,
//! job handles y el conjunto de artifacts ya descargados. `resume` vuelve a
//! registrar los stages en el grafo y restaura todo lo anterior.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config::state_file_in;
use super::{stage_fingerprints, Calculation, CalculationConfig, CalculationState};
use crate::constants::CALCULATION_FORMAT_VERSION;
use crate::errors::OrchestratorError;
use crate::event::{EventStore, InMemoryEventStore};
use crate::graph::StageStatus;
use crate::input::{InputRecord, InputSpecification, Vocabulary};
use crate::pipeline::Pipeline;
use crate::stage::{JobHandle, PipelinePlan};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub id: String,
    pub status: StageStatus,
    pub fingerprint: Option<String>,
    pub remote_dir: Option<String>,
    pub reused_from: Option<String>,
    pub job: Option<JobHandle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationRecord {
    pub format_version: u32,
    pub id: Uuid,
    pub input: InputRecord,
    pub definition_hash: String,
    pub state: CalculationState,
    pub stages: Vec<StageRecord>,
    pub retrieved: BTreeSet<String>,
    pub saved_at: DateTime<Utc>,
}

impl CalculationRecord {
    pub fn read(path: &Path) -> Result<Self, OrchestratorError> {
        let text = fs::read_to_string(path)?;
        let raw: serde_json::Value = serde_json::from_str(&text)?;
        match raw.get("format_version").and_then(|v| v.as_u64()) {
            Some(v) if v == u64::from(CALCULATION_FORMAT_VERSION) => {}
            Some(v) => {
                return Err(OrchestratorError::CorruptSnapshot(format!("{}: format_version {v}, expected {CALCULATION_FORMAT_VERSION}",
                                                                      path.display())))
            }
            None => return Err(OrchestratorError::CorruptSnapshot(format!("{}: missing format_version", path.display()))),
        }
        Ok(serde_json::from_value(raw)?)
    }
}

/// Stages cuyo fingerprint guardado no coincide con el que `input` produce
/// con `plan`.
pub fn changed_stages(record: &CalculationRecord, input: &InputSpecification, plan: &PipelinePlan) -> Vec<String> {
    let fps = stage_fingerprints(input, plan);
    record.stages
          .iter()
          .filter(|s| s.fingerprint.as_ref() != fps.get(&s.id))
          .map(|s| s.id.clone())
          .collect()
}

impl<E: EventStore> Calculation<E> {
    pub fn to_record(&self) -> CalculationRecord {
        let stages = self.plan
                         .stages()
                         .iter()
                         .filter_map(|d| {
                             self.stage(d.id()).map(|s| StageRecord { id: d.id().to_string(),
                                                                      status: s.status,
                                                                      fingerprint: s.fingerprint,
                                                                      remote_dir: s.remote_dir,
                                                                      reused_from: s.reused_from,
                                                                      job: self.jobs.get(d.id()).cloned() })
                         })
                         .collect();
        CalculationRecord { format_version: CALCULATION_FORMAT_VERSION,
                            id: self.id,
                            input: self.input.to_record(),
                            definition_hash: self.plan.definition_hash().to_string(),
                            state: self.state,
                            stages,
                            retrieved: self.retrieved.clone(),
                            saved_at: Utc::now() }
    }

    /// Escribe `<local_root>/.<name>_state.json`.
    pub fn save_state(&self) -> Result<std::path::PathBuf, OrchestratorError> {
        let path = self.config.state_file(self.name());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.to_record()).map_err(|e| OrchestratorError::Internal(e.to_string()))?;
        fs::write(&path, json)?;
        debug!("calculation {}: state saved to {}", self.name(), path.display());
        Ok(path)
    }

    /// Reconstruye un cálculo a partir de su snapshot. El plan debe ser el
    /// mismo con el que se guardó (mismo `definition_hash`).
    pub fn resume_with_event_store(record: CalculationRecord,
                                   vocabulary: Arc<Vocabulary>,
                                   plan: PipelinePlan,
                                   pipeline: Arc<Pipeline>,
                                   config: CalculationConfig,
                                   event_store: E)
                                   -> Result<Self, OrchestratorError> {
        let input = InputSpecification::from_record(record.input.clone(), vocabulary)?;
        Self::restore(record, input, plan, pipeline, config, event_store)
    }

    /// Como `resume`, pero con un input nuevo para el mismo nombre. Los stages
    /// cuyo fingerprint cambió (y por encadenamiento todos sus dependientes)
    /// vuelven a Pending; sus jobs y artifacts descargados se olvidan.
    pub fn resume_with_input(record: CalculationRecord,
                             input: InputSpecification,
                             plan: PipelinePlan,
                             pipeline: Arc<Pipeline>,
                             config: CalculationConfig,
                             event_store: E)
                             -> Result<Self, OrchestratorError> {
        if record.input.name != input.name() {
            return Err(OrchestratorError::InvalidInput(format!("state of '{}' cannot resume input '{}'",
                                                               record.input.name,
                                                               input.name())));
        }
        Self::restore(record, input, plan, pipeline, config, event_store)
    }

    fn restore(record: CalculationRecord,
               input: InputSpecification,
               plan: PipelinePlan,
               pipeline: Arc<Pipeline>,
               config: CalculationConfig,
               event_store: E)
               -> Result<Self, OrchestratorError> {
        if record.definition_hash != plan.definition_hash() {
            return Err(OrchestratorError::CorruptSnapshot(format!("calculation '{}' was saved with a different pipeline plan",
                                                                  record.input.name)));
        }
        let mut calc = Self::build(record.id, input, plan, pipeline, config, event_store)?;
        calc.state = record.state;
        let mut jobs = BTreeMap::new();
        let mut stale = BTreeSet::new();
        for s in record.stages {
            let current = calc.stage(&s.id).and_then(|st| st.fingerprint);
            if current != s.fingerprint {
                stale.insert(s.id);
                continue;
            }
            let q = calc.qualified(&s.id);
            calc.pipeline.with_graph(|g| -> Result<(), OrchestratorError> {
                             g.restore_status(&q, s.status);
                             g.set_remote_dir(&q, s.remote_dir.clone())?;
                             g.set_reused_from(&q, s.reused_from.clone())?;
                             Ok(())
                         })?;
            if let Some(job) = s.job {
                jobs.insert(s.id, job);
            }
        }
        calc.jobs = jobs;
        calc.retrieved = record.retrieved
                               .into_iter()
                               .filter(|key| {
                                   key.split_once('/')
                                      .map_or(true, |(stage, _)| !stale.contains(stage))
                               })
                               .collect();
        if !stale.is_empty() {
            info!("calculation {}: input changed, starting over at {:?}", calc.name(), stale);
            calc.state = CalculationState::NotStarted;
            calc.settle_state();
        }
        info!("calculation {}: resumed in state {}", calc.name(), calc.state);
        Ok(calc)
    }
}

impl Calculation<InMemoryEventStore> {
    pub fn resume(record: CalculationRecord,
                  vocabulary: Arc<Vocabulary>,
                  plan: PipelinePlan,
                  pipeline: Arc<Pipeline>,
                  config: CalculationConfig)
                  -> Result<Self, OrchestratorError> {
        Self::resume_with_event_store(record, vocabulary, plan, pipeline, config, InMemoryEventStore::default())
    }

    /// Retoma `<local_root>/.<name>_state.json` si existe; si no, crea el
    /// cálculo desde `input`. Si el input cambió respecto del guardado de un
    /// modo que afecta a algún stage, falla con `InvalidInput`: hay que
    /// hacer un fork o usar `open_replacing`.
    pub fn open_or_create(input: InputSpecification,
                          plan: PipelinePlan,
                          pipeline: Arc<Pipeline>,
                          config: CalculationConfig)
                          -> Result<Self, OrchestratorError> {
        let path = state_file_in(&config.local_root, input.name());
        if !path.exists() {
            return Self::new(input, plan, pipeline, config);
        }
        let record = CalculationRecord::read(&path)?;
        let changed = changed_stages(&record, &input, &plan);
        if !changed.is_empty() {
            return Err(OrchestratorError::InvalidInput(format!("input '{}' changed since it was saved (affects {}); fork it under a new name or overwrite",
                                                               input.name(),
                                                               changed.join(", "))));
        }
        let vocabulary = Arc::clone(input.vocabulary());
        Self::resume(record, vocabulary, plan, pipeline, config)
    }

    /// Retoma el estado guardado adoptando `input` tal como viene: los stages
    /// afectados por el cambio empiezan de nuevo, el resto conserva su estado.
    pub fn open_replacing(input: InputSpecification,
                          plan: PipelinePlan,
                          pipeline: Arc<Pipeline>,
                          config: CalculationConfig)
                          -> Result<Self, OrchestratorError> {
        let path = state_file_in(&config.local_root, input.name());
        if !path.exists() {
            return Self::new(input, plan, pipeline, config);
        }
        let record = CalculationRecord::read(&path)?;
        Self::resume_with_input(record, input, plan, pipeline, config, InMemoryEventStore::default())
    }
}
