//! Envío y sondeo de stages.
//!
//! Invariantes:
//! - Un stage solo se marca `Submitted` después de que el envío remoto
//!   respondió con un job handle; si algo falla antes queda `Pending`.
//! - `run` es idempotente: stages `Submitted`/`Running` no se reenvían.
//! - Ninguna llamada remota se hace con el lock del grafo tomado.

use std::path::Path;

use log::{debug, info, warn};

use super::{Calculation, CalculationState, ReusedStage, RunReport, StatusChange, StatusReport};
use crate::cancel::CancellationToken;
use crate::errors::OrchestratorError;
use crate::event::{CalculationEventKind, EventStore};
use crate::graph::{ExecutionTarget, StageStatus};
use crate::remote::RemoteFile;
use crate::stage::StageDefinition;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Resetea los stages propios ya ejecutados y los vuelve a enviar.
    pub overwrite: bool,
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    pub fn overwrite() -> Self {
        Self { overwrite: true, cancel: None }
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().map(CancellationToken::is_cancelled).unwrap_or(false)
    }
}

impl<E: EventStore> Calculation<E> {
    pub fn run(&mut self, overwrite: bool) -> Result<RunReport, OrchestratorError> {
        self.run_with(RunOptions { overwrite, cancel: None })
    }

    pub fn run_with(&mut self, opts: RunOptions) -> Result<RunReport, OrchestratorError> {
        if opts.cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let mut report = RunReport::default();
        let result = self.drive(&opts, &mut report);
        if !report.is_noop() || self.state == CalculationState::Submitting {
            self.settle_state();
            // nada llegó a enviarse
            if self.state == CalculationState::Submitting {
                self.transition(CalculationState::NotStarted);
            }
        }
        result.map(|()| report)
    }

    fn drive(&mut self, opts: &RunOptions, report: &mut RunReport) -> Result<(), OrchestratorError> {
        if opts.overwrite {
            report.reset = self.reset_own_stages()?;
        }

        let mut issued_remote = false;
        loop {
            let ready = self.ready_own_stages();
            let Some(stage_id) = ready.into_iter().next() else { break };

            if opts.cancelled() {
                if !issued_remote && report.is_noop() {
                    return Err(OrchestratorError::Cancelled);
                }
                info!("calculation {}: run cancelled after {} submission(s)", self.name(), report.submitted.len());
                self.record_event(CalculationEventKind::RunCancelled { submitted: report.submitted.len() });
                report.cancelled = true;
                break;
            }
            if self.state == CalculationState::NotStarted {
                self.transition(CalculationState::Submitting);
            }

            if !opts.overwrite {
                if let Some(source) = self.try_reuse(&stage_id)? {
                    report.reused.push(ReusedStage { stage: stage_id, source });
                    continue;
                }
            }

            let def = self.definition(&stage_id)?;
            match def.target() {
                ExecutionTarget::Local => {
                    self.run_local_stage(def.as_ref())?;
                    report.completed_locally.push(stage_id);
                }
                ExecutionTarget::Remote => {
                    issued_remote = true;
                    self.submit_stage(def.as_ref())?;
                    report.submitted.push(stage_id);
                }
            }
        }
        Ok(())
    }

    /// Stages propios en la frontera lista, en orden topológico.
    fn ready_own_stages(&self) -> Vec<String> {
        let prefix = self.prefix();
        self.pipeline
            .ready_stages()
            .into_iter()
            .filter_map(|q| q.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    /// Fuerza a `Pending` todo stage propio que ya avanzó (o fue adoptado)
    /// y olvida sus jobs y artifacts descargados.
    fn reset_own_stages(&mut self) -> Result<Vec<String>, OrchestratorError> {
        let mut reset = Vec::new();
        for (id, status) in self.stage_statuses() {
            let reused = self.stage(&id).map(|s| s.reused_from.is_some()).unwrap_or(false);
            if status == StageStatus::Pending && !reused {
                continue;
            }
            let q = self.qualified(&id);
            let changed = self.pipeline.mark(&q, StageStatus::Pending, true)?;
            self.pipeline.with_graph(|g| g.set_remote_dir(&q, None))?;
            for name in changed.iter().chain(std::iter::once(&q)) {
                if let Some(own) = name.strip_prefix(&self.prefix()) {
                    if !reset.iter().any(|r| r == own) {
                        reset.push(own.to_string());
                    }
                }
            }
        }
        for id in &reset {
            self.jobs.remove(id);
            let prefix = format!("{id}/");
            self.retrieved.retain(|f| !f.starts_with(&prefix));
        }
        if !reset.is_empty() {
            info!("calculation {}: overwrite reset {:?}", self.name(), reset);
            self.record_event(CalculationEventKind::StageReset { stages: reset.clone() });
            self.transition(CalculationState::NotStarted);
        }
        Ok(reset)
    }

    /// Adopta un stage `Done` de otro cálculo con el mismo fingerprint.
    fn try_reuse(&mut self, stage_id: &str) -> Result<Option<String>, OrchestratorError> {
        let q = self.qualified(stage_id);
        let prefix = self.prefix();
        let adopted = self.pipeline.with_graph(|g| {
                                       let fp = match g.stage(&q).and_then(|s| s.fingerprint.clone()) {
                                           Some(fp) => fp,
                                           None => return Ok(None),
                                       };
                                       let source = match g.find_done_by_fingerprint(&fp, &prefix) {
                                           Some(s) => s.name.clone(),
                                           None => return Ok(None),
                                       };
                                       g.adopt(&q, &source)?;
                                       Ok::<_, OrchestratorError>(Some((source, fp)))
                                   })?;
        Ok(adopted.map(|(source, fingerprint)| {
                      info!("calculation {}: {stage_id} reuses {source}", self.name());
                      self.record_event(CalculationEventKind::StageReused { stage: stage_id.to_string(),
                                                                           source: source.clone(),
                                                                           fingerprint });
                      source
                  }))
    }

    fn run_local_stage(&mut self, def: &dyn StageDefinition) -> Result<(), OrchestratorError> {
        let q = self.qualified(def.id());
        let result = {
            let ctx = self.context(def);
            def.prepare(&ctx).and_then(|_| def.run_local(&ctx))
        };
        match result {
            Ok(()) => {
                self.pipeline.mark(&q, StageStatus::Done, false)?;
                self.record_event(CalculationEventKind::StageCompletedLocally { stage: def.id().to_string() });
                debug!("calculation {}: local stage {} done", self.name(), def.id());
                Ok(())
            }
            Err(e) => {
                warn!("calculation {}: local stage {} failed: {e}", self.name(), def.id());
                self.pipeline.mark(&q, StageStatus::Failed, false)?;
                self.record_event(CalculationEventKind::StageStatusChanged { stage: def.id().to_string(),
                                                                            from: StageStatus::Pending,
                                                                            to: StageStatus::Failed });
                Err(e)
            }
        }
    }

    /// prepare -> mkdir -> upload -> submit. Cualquier error deja el stage
    /// `Pending` y se propaga tal cual.
    fn submit_stage(&mut self, def: &dyn StageDefinition) -> Result<(), OrchestratorError> {
        let connection = self.pipeline.connection().clone();
        let timeout = self.config.command_timeout;
        let (remote_dir, submit, uploads) = {
            let ctx = self.context(def);
            let files = def.prepare(&ctx)?;
            let uploads: Vec<RemoteFile> = files.iter()
                                                .map(|rel| {
                                                    RemoteFile::new(format!("{}/{}", ctx.remote_dir, slash_path(rel)),
                                                                    ctx.local_dir.join(rel))
                                                })
                                                .collect();
            (ctx.remote_dir.clone(), def.submit_command(&ctx), uploads)
        };

        connection.execute_checked(&format!("mkdir -p {}", crate::stage::shell_quote(&remote_dir)), timeout)?;
        if !uploads.is_empty() {
            let up = connection.upload(&uploads, self.config.transfer_timeout)?;
            if !up.is_complete() {
                let reasons: Vec<String> = up.failed()
                                             .map(|o| format!("{}: {:?}", o.remote, o.status))
                                             .collect();
                return Err(OrchestratorError::RemoteCommand { command: format!("upload to {remote_dir}"),
                                                              exit_code: -1,
                                                              stderr: reasons.join("; ") });
            }
        }
        debug!("calculation {}: submit {}", self.name(), submit);
        let out = connection.execute_checked(&submit, timeout)?;
        let job = def.parse_submission(&out)?;

        let q = self.qualified(def.id());
        self.pipeline.with_graph(|g| g.set_remote_dir(&q, Some(remote_dir.clone())))?;
        self.pipeline.mark(&q, StageStatus::Submitted, false)?;
        info!("calculation {}: submitted {} as job {}", self.name(), def.id(), job.id);
        self.record_event(CalculationEventKind::StageSubmitted { stage: def.id().to_string(),
                                                                job_id: job.id.clone(),
                                                                remote_dir });
        self.jobs.insert(def.id().to_string(), job);
        Ok(())
    }

    /// Un único sondeo de todos los stages propios en vuelo. No espera a que
    /// terminen; los errores de la conexión se propagan sin reintentar, pero
    /// el estado agregado refleja los stages ya sondeados.
    pub fn get_status(&mut self) -> Result<StatusReport, OrchestratorError> {
        let mut changes = Vec::new();
        let outcome = self.poll_in_flight(&mut changes);
        self.settle_state();
        if let Err(e) = outcome {
            if !changes.is_empty() {
                warn!("calculation {}: poll interrupted after {} change(s): {e}", self.name(), changes.len());
            }
            return Err(e);
        }
        Ok(StatusReport { changes, state: self.state })
    }

    fn poll_in_flight(&mut self, changes: &mut Vec<StatusChange>) -> Result<(), OrchestratorError> {
        let connection = self.pipeline.connection().clone();
        for (id, status) in self.stage_statuses() {
            if !status.is_in_flight() {
                continue;
            }
            let Some(job) = self.jobs.get(&id).cloned() else {
                debug!("calculation {}: {id} in flight without job handle", self.name());
                continue;
            };
            let def = self.definition(&id)?;
            let query = {
                let ctx = self.context(def.as_ref());
                def.status_command(&ctx, &job)
            };
            let out = connection.execute(&query, self.config.command_timeout)?;
            let remote = def.parse_status(&out);
            debug!("calculation {}: {id} job {} -> {remote:?}", self.name(), job.id);
            let Some(next) = remote.as_stage_status() else { continue };
            if next == status {
                continue;
            }
            match self.pipeline.mark(&self.qualified(&id), next, false) {
                Ok(_) => {
                    info!("calculation {}: {id} {status} -> {next}", self.name());
                    self.record_event(CalculationEventKind::StageStatusChanged { stage: id.clone(),
                                                                                from: status,
                                                                                to: next });
                    changes.push(StatusChange { stage: id, from: status, to: next });
                }
                Err(OrchestratorError::InvalidTransition { .. }) => {
                    debug!("calculation {}: ignoring stale report {next} for {id}", self.name());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Un sondeo seguido de un `run` sin overwrite: avanza la frontera con lo
    /// que haya terminado.
    pub fn advance(&mut self) -> Result<(StatusReport, RunReport), OrchestratorError> {
        let status = self.get_status()?;
        let run = self.run(false)?;
        Ok((status, run))
    }
}

fn slash_path(p: &Path) -> String {
    p.components()
     .map(|c| c.as_os_str().to_string_lossy().into_owned())
     .collect::<Vec<_>>()
     .join("/")
}
