//! Sincronización incremental de artifacts.
//!
//! Solo se transfieren archivos de stages `Done` que todavía no se trajeron.
//! Un fallo por archivo no aborta el resto: queda en el reporte y la próxima
//! llamada reintenta únicamente lo pendiente.

use std::path::PathBuf;

use log::{info, warn};

use super::{Calculation, CalculationState, FailedArtifact, RetrievedArtifact, SyncReport};
use crate::errors::OrchestratorError;
use crate::event::{CalculationEventKind, EventStore};
use crate::graph::StageStatus;
use crate::hashing::hash_file;
use crate::remote::{RemoteFile, TransferStatus};
use crate::results::ResultsHandler;

impl<E: EventStore> Calculation<E> {
    pub fn sync(&mut self) -> Result<SyncReport, OrchestratorError> {
        let local_dir = self.local_dir();
        let statuses = self.stage_statuses();
        let mut report = SyncReport { retrieved: Vec::new(),
                                      failed: Vec::new(),
                                      outstanding_stages: Vec::new(),
                                      results: ResultsHandler::open(self.name(), &local_dir) };

        let done: Vec<String> = statuses.iter()
                                        .filter(|(_, s)| *s == StageStatus::Done)
                                        .map(|(id, _)| id.clone())
                                        .collect();
        if done.is_empty() {
            report.outstanding_stages = statuses.into_iter().map(|(id, _)| id).collect();
            return Ok(report);
        }
        if self.state != CalculationState::Failed {
            self.transition(CalculationState::Syncing);
        }

        let connection = self.pipeline.connection().clone();
        for id in &done {
            let def = self.definition(id)?;
            let (remote_dir, files) = {
                let ctx = self.context(def.as_ref());
                (ctx.remote_dir.clone(), def.artifacts(&ctx))
            };
            let missing: Vec<String> = files.into_iter()
                                            .filter(|f| !self.retrieved.contains(&artifact_key(id, f)))
                                            .collect();
            if missing.is_empty() {
                continue;
            }
            let requests: Vec<RemoteFile> = missing.iter()
                                                   .map(|f| {
                                                       RemoteFile::new(format!("{remote_dir}/{f}"),
                                                                       PathBuf::from(def.directory()).join(f))
                                                   })
                                                   .collect();
            let outcome = connection.transfer(&requests, &local_dir, self.config.transfer_timeout)?;

            let mut copied = Vec::new();
            let mut bytes_total: u64 = 0;
            for (file, request) in missing.iter().zip(requests.iter()) {
                let status = outcome.outcomes
                                    .iter()
                                    .find(|o| o.remote == request.remote)
                                    .map(|o| (o.local.clone(), o.status.clone()));
                let result = match status {
                    Some((local, TransferStatus::Copied { bytes })) => match hash_file(&local) {
                        Ok(sha256) => Ok((local, bytes, sha256)),
                        Err(e) => Err(format!("hashing {}: {e}", local.display())),
                    },
                    Some((_, TransferStatus::Failed { reason })) => Err(reason),
                    None => Err("no outcome reported for this file".to_string()),
                };
                match result {
                    Ok((local_path, bytes, sha256)) => {
                        self.retrieved.insert(artifact_key(id, file));
                        bytes_total += bytes;
                        copied.push(file.clone());
                        report.retrieved.push(RetrievedArtifact { stage: id.clone(),
                                                                  file: file.clone(),
                                                                  local_path,
                                                                  bytes,
                                                                  sha256 });
                    }
                    Err(reason) => {
                        warn!("calculation {}: failed to retrieve {}: {reason}", self.name(), request.remote);
                        self.record_event(CalculationEventKind::ArtifactTransferFailed { stage: id.clone(),
                                                                                        file: file.clone(),
                                                                                        reason: reason.clone() });
                        report.failed.push(FailedArtifact { stage: id.clone(),
                                                            remote: request.remote.clone(),
                                                            reason });
                    }
                }
            }
            if !copied.is_empty() {
                info!("calculation {}: retrieved {} file(s) of {id} ({bytes_total} bytes)", self.name(), copied.len());
                self.record_event(CalculationEventKind::ArtifactsRetrieved { stage: id.clone(),
                                                                            files: copied,
                                                                            bytes: bytes_total });
            }
        }

        report.outstanding_stages = statuses.iter()
                                            .filter(|(id, s)| {
                                                *s != StageStatus::Done || report.failed.iter().any(|f| &f.stage == id)
                                            })
                                            .map(|(id, _)| id.clone())
                                            .collect();
        if self.state != CalculationState::Failed && report.failed.is_empty() && report.outstanding_stages.is_empty() {
            self.settle_state();
        }
        Ok(report)
    }

    /// Archivos ya descargados, como `<stage>/<archivo>`.
    pub fn retrieved(&self) -> impl Iterator<Item = &String> {
        self.retrieved.iter()
    }
}

fn artifact_key(stage: &str, file: &str) -> String {
    format!("{stage}/{file}")
}
