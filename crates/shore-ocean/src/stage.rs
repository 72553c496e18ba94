//! Stages de OCEAN. Cada uno corre el solver limitado a su etapa en un
//! directorio propio (`Common`, `OPF`, `DFT`, `PREP`, `SCREEN`, `CNBSE`) con
//! su copia de `ocean.in`.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use serde_json::{json, Value};
use shore_core::constants::COMPLETION_SENTINEL;
use shore_core::errors::OrchestratorError;
use shore_core::input::Vocabulary;
use shore_core::remote::CommandOutput;
use shore_core::stage::{upstream_var, JobHandle, RemoteJobState, Scheduler, StageContext, StageDefinition, JOB_SCRIPT,
                        LOG_FILE};

use crate::input::{write_ocean_input, OCEAN_INPUT};
use crate::spectra::XasTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OceanStageKind {
    Parsing,
    Opf,
    Dft,
    Prep,
    Screen,
    Cnbse,
}

impl OceanStageKind {
    pub const ALL: [OceanStageKind; 6] = [Self::Parsing, Self::Opf, Self::Dft, Self::Prep, Self::Screen, Self::Cnbse];

    pub fn id(self) -> &'static str {
        match self {
            Self::Parsing => "parsing",
            Self::Opf => "opf",
            Self::Dft => "dft",
            Self::Prep => "prep",
            Self::Screen => "screen",
            Self::Cnbse => "cnbse",
        }
    }

    pub fn directory(self) -> &'static str {
        match self {
            Self::Parsing => "Common",
            Self::Opf => "OPF",
            Self::Dft => "DFT",
            Self::Prep => "PREP",
            Self::Screen => "SCREEN",
            Self::Cnbse => "CNBSE",
        }
    }

    /// Etapa anterior en la cadena lineal.
    pub fn previous(self) -> Option<Self> {
        let i = Self::ALL.iter().position(|k| *k == self)?;
        i.checked_sub(1).map(|p| Self::ALL[p])
    }

    fn extra_artifacts(self) -> &'static [&'static str] {
        match self {
            Self::Dft => &["scf.in", "scf.out", "nscf.in", "nscf.out"],
            Self::Screen => &["mpi_avg.log"],
            Self::Cnbse => &["ocean.log"],
            _ => &[],
        }
    }
}

const PARSING_MARKERS: &[&str] = &["Storing parsed data", "Finished running extractPsp", "Done with parsing"];
const OPF_MARKERS: &[&str] = &["Entering OPF stage", COMPLETION_SENTINEL];
const DFT_MARKERS: &[&str] = &["Entering DFT stage",
                               "SCF stage complete",
                               "DFT for BSE final states complete",
                               "DFT section is complete"];
const PREP_MARKERS: &[&str] = &["Entering PREP stage", COMPLETION_SENTINEL];
const SCREEN_MARKERS: &[&str] = &["Entering SCREENing stage", "Time offset:"];
const CNBSE_MARKERS: &[&str] = &["CNBSE stage", "Ocean is done"];

/// Avance de un stage medido por los marcadores que OCEAN deja en su log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageProgress {
    pub seen: usize,
    pub total: usize,
}

impl StageProgress {
    pub fn is_finished(&self) -> bool {
        self.seen == self.total
    }
}

impl fmt::Display for StageProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.seen, self.total)
    }
}

impl OceanStageKind {
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.id() == id)
    }

    /// Líneas del log que marcan cada paso del stage, en orden.
    pub fn progress_markers(self) -> &'static [&'static str] {
        match self {
            Self::Parsing => PARSING_MARKERS,
            Self::Opf => OPF_MARKERS,
            Self::Dft => DFT_MARKERS,
            Self::Prep => PREP_MARKERS,
            Self::Screen => SCREEN_MARKERS,
            Self::Cnbse => CNBSE_MARKERS,
        }
    }

    pub fn progress(self, log: &str) -> StageProgress {
        let markers = self.progress_markers();
        StageProgress { seen: markers.iter().filter(|m| log.contains(**m)).count(), total: markers.len() }
    }
}

impl fmt::Display for OceanStageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone)]
pub struct OceanStage {
    kind: OceanStageKind,
    scheduler: Scheduler,
}

impl OceanStage {
    pub fn new(kind: OceanStageKind, scheduler: Scheduler) -> Self {
        Self { kind, scheduler }
    }

    pub fn kind(&self) -> OceanStageKind {
        self.kind
    }

    pub fn progress(&self, log: &str) -> StageProgress {
        self.kind.progress(log)
    }

    fn command(&self, ctx: &StageContext) -> String {
        let bin = ctx.input.str_value("ocean_bin").unwrap_or("ocean.pl");
        format!("{bin} --stage {} {OCEAN_INPUT}", self.kind.id())
    }
}

impl StageDefinition for OceanStage {
    fn id(&self) -> &str {
        self.kind.id()
    }

    fn directory(&self) -> &str {
        self.kind.directory()
    }

    fn dependencies(&self) -> Vec<String> {
        self.kind.previous().map(|p| vec![p.id().to_string()]).unwrap_or_default()
    }

    /// PREP, SCREEN y CNBSE consumen el bloque `edges` de `ocean.in`, que
    /// sale de `sites` y `edge`.
    fn relevant_params(&self, vocabulary: &Vocabulary) -> Vec<String> {
        let (categories, extra): (&[&str], &[&str]) = match self.kind {
            OceanStageKind::Parsing | OceanStageKind::Opf | OceanStageKind::Dft => {
                (&["structure", "dft"], &["element", "edge"])
            }
            OceanStageKind::Prep => (&["structure", "dft"], &["element", "edge", "sites"]),
            OceanStageKind::Screen => (&["screen"], &["element", "edge", "sites"]),
            OceanStageKind::Cnbse => (&["cnbse"], &["element", "edge", "sites", "polarizations"]),
        };
        let mut keys = vocabulary.keys_in(categories);
        keys.extend(extra.iter().map(|k| k.to_string()));
        keys
    }

    fn signature(&self) -> Value {
        json!({ "solver": "ocean", "stage": self.kind.id(), "directory": self.kind.directory() })
    }

    fn prepare(&self, ctx: &StageContext) -> Result<Vec<PathBuf>, OrchestratorError> {
        fs::create_dir_all(&ctx.local_dir)?;
        fs::write(ctx.local_dir.join(OCEAN_INPUT), write_ocean_input(ctx.input)?)?;

        let ncores = ctx.input
                        .value("ncores")
                        .and_then(Value::as_u64)
                        .and_then(|n| u32::try_from(n).ok())
                        .unwrap_or(1);
        let exports: Vec<(String, String)> = ctx.upstream_dirs
                                                .iter()
                                                .map(|(dep, dir)| (upstream_var(dep), dir.clone()))
                                                .collect();
        let job_name = format!("{}-{}", ctx.calculation, self.kind.id());
        let script = self.scheduler.job_script(&job_name, ncores, &exports, &self.command(ctx), LOG_FILE);
        fs::write(ctx.local_dir.join(JOB_SCRIPT), script)?;
        Ok(vec![PathBuf::from(JOB_SCRIPT), PathBuf::from(OCEAN_INPUT)])
    }

    fn submit_command(&self, ctx: &StageContext) -> String {
        self.scheduler.submit_command(&ctx.remote_dir, JOB_SCRIPT)
    }

    fn parse_submission(&self, output: &CommandOutput) -> Result<JobHandle, OrchestratorError> {
        self.scheduler.parse_submission(output)
    }

    fn status_command(&self, ctx: &StageContext, job: &JobHandle) -> String {
        self.scheduler.status_command(job, &ctx.remote_dir, LOG_FILE)
    }

    fn parse_status(&self, output: &CommandOutput) -> RemoteJobState {
        self.scheduler.parse_status(output)
    }

    fn artifacts(&self, ctx: &StageContext) -> Vec<String> {
        let mut files = vec![LOG_FILE.to_string()];
        files.extend(self.kind.extra_artifacts().iter().map(|f| f.to_string()));
        if self.kind == OceanStageKind::Cnbse {
            // sin target válido `prepare` ya falló y el stage nunca llega a Done
            if let Ok(target) = XasTarget::from_input(ctx.input) {
                files.extend(target.files().into_iter().map(|(_, f)| f));
            }
        }
        files
    }

    fn diagnostic_files(&self) -> Vec<String> {
        let mut files = vec![LOG_FILE.to_string()];
        files.extend(self.scheduler.output_files().iter().map(|f| f.to_string()));
        files
    }
}
