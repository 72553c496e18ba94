//! Diagnóstico de stages: trae el log y la salida del scheduler a
//! `<local>/<stage>/logs/` sin tocar el registro de artifacts descargados.

use std::fs;
use std::path::PathBuf;

use log::{debug, warn};

use super::{Calculation, FailedArtifact, StageDiagnostics};
use crate::errors::OrchestratorError;
use crate::event::EventStore;
use crate::graph::ExecutionTarget;
use crate::remote::{RemoteFile, TransferStatus};

const LOGS_DIR: &str = "logs";

impl<E: EventStore> Calculation<E> {
    /// Trae los archivos de diagnóstico de `stage`. Un stage que todavía no
    /// tiene directorio remoto (nunca se envió) o que corre local devuelve
    /// un diagnóstico vacío sin llamar a la conexión.
    pub fn fetch_diagnostics(&self, stage: &str) -> Result<StageDiagnostics, OrchestratorError> {
        let def = self.definition(stage)?;
        let mut diagnostics = StageDiagnostics { stage: stage.to_string(), ..StageDiagnostics::default() };
        let node = self.stage(stage).ok_or_else(|| OrchestratorError::UnknownStage(self.qualified(stage)))?;
        let Some(remote_dir) = node.remote_dir.filter(|_| node.target == ExecutionTarget::Remote) else {
            debug!("calculation {}: {stage} has no remote directory yet", self.name());
            return Ok(diagnostics);
        };

        let local_dir = self.local_dir();
        let requests: Vec<RemoteFile> = def.diagnostic_files()
                                           .iter()
                                           .map(|f| {
                                               RemoteFile::new(format!("{remote_dir}/{f}"),
                                                               PathBuf::from(def.directory()).join(LOGS_DIR).join(f))
                                           })
                                           .collect();
        let report = self.pipeline
                         .connection()
                         .transfer(&requests, &local_dir, self.config.transfer_timeout)?;

        for request in &requests {
            let name = request.local
                              .file_name()
                              .map(|n| n.to_string_lossy().into_owned())
                              .unwrap_or_default();
            let outcome = report.outcomes.iter().find(|o| o.remote == request.remote);
            let contents = match outcome.map(|o| &o.status) {
                Some(TransferStatus::Copied { .. }) => {
                    fs::read(local_dir.join(&request.local)).map(|b| String::from_utf8_lossy(&b).into_owned())
                                                            .map_err(|e| e.to_string())
                }
                Some(TransferStatus::Failed { reason }) => Err(reason.clone()),
                None => Err("no outcome reported for this file".to_string()),
            };
            match contents {
                Ok(text) => {
                    diagnostics.files.insert(name, text);
                }
                Err(reason) => {
                    debug!("calculation {}: diagnostic {} unavailable: {reason}", self.name(), request.remote);
                    diagnostics.missing.push(FailedArtifact { stage: stage.to_string(),
                                                              remote: request.remote.clone(),
                                                              reason });
                }
            }
        }
        if diagnostics.files.is_empty() && !diagnostics.missing.is_empty() {
            warn!("calculation {}: no diagnostics available for {stage}", self.name());
        }
        Ok(diagnostics)
    }
}
