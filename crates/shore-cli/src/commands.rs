//! Implementación de los subcomandos. Cada invocación retoma los cálculos
//! desde sus archivos de estado y los vuelve a guardar al terminar.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shore_core::calculation::{CalculationRecord, StageDiagnostics};
use shore_core::input::{InputSpecification, Vocabulary};
use shore_core::stage::PipelinePlan;
use shore_core::{Calculation, Pipeline, RemoteSession, StageStatus};
use shore_ocean::{load_spectra, ocean_plan, ocean_vocabulary, write_ocean_input, OceanStageKind};
use shore_remote::{create, persist, restore, Connection, Secret, ShoreConfig};

use crate::cli::{CredentialSaveArgs, ForkArgs, InputArgs, RunArgs};

/// Archivo de input tal como lo escribe el usuario.
#[derive(Debug, Serialize, Deserialize)]
pub struct InputFile {
    pub name: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl InputFile {
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn specification(&self, vocabulary: Arc<Vocabulary>) -> Result<InputSpecification> {
        let params = self.params.clone().into_iter();
        Ok(InputSpecification::new(&self.name, vocabulary, params)?)
    }
}

pub struct Workspace {
    config: ShoreConfig,
    vocabulary: Arc<Vocabulary>,
}

impl Workspace {
    pub fn new(config: ShoreConfig) -> Self {
        Self { config, vocabulary: Arc::new(ocean_vocabulary()) }
    }

    fn plan(&self) -> Result<PipelinePlan> {
        Ok(ocean_plan(self.config.scheduler)?)
    }

    fn input(&self, path: &Path) -> Result<InputSpecification> {
        InputFile::read(path)?.specification(Arc::clone(&self.vocabulary))
    }

    fn connect(&self) -> Result<Arc<Connection>> {
        let credential = restore(&self.config.credential_path).context("loading credential (run `shore credential save`)")?;
        Ok(Arc::new(Connection::open(credential, self.config.ssh_options())?))
    }

    /// Abre el cálculo de `path` junto con los demás cálculos guardados en el
    /// mismo directorio, para que sus stages terminados sean reutilizables.
    /// Con `replace` un input editado reemplaza al guardado.
    fn open(&self, path: &Path, replace: bool) -> Result<Calculation> {
        let input = self.input(path)?;
        let connection: Arc<dyn RemoteSession> = self.connect()?;
        let pipeline = Pipeline::new(connection);
        let plan = self.plan()?;
        for state in saved_states(&self.config.local_root)? {
            let record = match CalculationRecord::read(&state) {
                Ok(r) if r.input.name != input.name() => r,
                Ok(_) => continue,
                Err(e) => {
                    warn!("skipping {}: {e}", state.display());
                    continue;
                }
            };
            let name = record.input.name.clone();
            if let Err(e) = Calculation::resume(record,
                                                Arc::clone(&self.vocabulary),
                                                plan.clone(),
                                                pipeline.clone(),
                                                self.config.calculation_config())
            {
                warn!("calculation {name} not available for reuse: {e}");
            }
        }
        let config = self.config.calculation_config();
        let calc = if replace {
            Calculation::open_replacing(input, plan, pipeline, config)?
        } else {
            Calculation::open_or_create(input, plan, pipeline, config)?
        };
        Ok(calc)
    }
}

/// Archivos `.<nombre>_state.json` bajo `root`.
fn saved_states(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if !root.is_dir() {
        return Ok(out);
    }
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        let file = path.file_name().and_then(|f| f.to_str()).unwrap_or_default();
        if file.starts_with('.') && file.ends_with("_state.json") {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

pub fn credential_save(config: &ShoreConfig, args: CredentialSaveArgs) -> Result<()> {
    let secret = match (args.identity, args.password_env) {
        (Some(path), _) => Secret::IdentityFile(path),
        (None, Some(var)) => Secret::Password(std::env::var(&var).with_context(|| format!("reading password from ${var}"))?),
        (None, None) => Secret::Agent,
    };
    let mut credential = create(&args.host, &args.user, secret)?;
    if let Some(port) = args.port {
        credential = credential.with_port(port);
    }
    persist(&credential, &config.credential_path)?;
    println!("credential for {} saved to {}", credential.destination(), config.credential_path.display());
    Ok(())
}

pub fn credential_check(config: &ShoreConfig) -> Result<()> {
    let credential = restore(&config.credential_path)?;
    let connection = Connection::open(credential, config.ssh_options())?;
    println!("connected to {}", connection.credential().destination());
    connection.close()?;
    Ok(())
}

pub fn run(ws: &Workspace, args: RunArgs) -> Result<()> {
    let mut calc = ws.open(&args.input.input, args.overwrite)?;
    let outcome = if args.overwrite { calc.run(true) } else { calc.advance().map(|(_, run)| run) };
    calc.save_state()?;
    let report = outcome?;
    for r in &report.reused {
        println!("{:<8} reused from {}", r.stage, r.source);
    }
    for s in &report.submitted {
        let job = calc.job(s).map(|j| j.id.as_str()).unwrap_or("-");
        println!("{s:<8} submitted as job {job}");
    }
    for s in &report.completed_locally {
        println!("{s:<8} completed locally");
    }
    if report.is_noop() {
        println!("nothing to submit");
    }
    println!("calculation {}: {}", calc.name(), calc.state());
    Ok(())
}

pub fn status(ws: &Workspace, args: InputArgs) -> Result<()> {
    let mut calc = ws.open(&args.input, false)?;
    let outcome = calc.get_status();
    calc.save_state()?;
    let report = outcome?;
    for change in &report.changes {
        info!("{}: {} -> {}", change.stage, change.from, change.to);
    }
    println!("calculation {}: {}", calc.name(), calc.state());
    for (id, status) in calc.stage_statuses() {
        let job = calc.job(&id).map(|j| j.id.clone()).unwrap_or_else(|| "-".into());
        let reused = calc.stage(&id).and_then(|s| s.reused_from).map(|src| format!(" (reused from {src})"));
        println!("  {id:<8} {:<10} {job}{}", status.to_string(), reused.unwrap_or_default());
        if status == StageStatus::Failed || status.is_in_flight() {
            match calc.fetch_diagnostics(&id) {
                Ok(diag) => stage_notes(status, &diag).iter().for_each(|n| println!("           {n}")),
                Err(e) => warn!("diagnostics of {id} unavailable: {e}"),
            }
        }
    }
    Ok(())
}

const TAIL_LINES: usize = 5;

/// Líneas extra de `status` para un stage: avance según el log mientras
/// corre; final de `err` y del log si falló.
fn stage_notes(status: StageStatus, diag: &StageDiagnostics) -> Vec<String> {
    let mut notes = Vec::new();
    if status.is_in_flight() {
        if let (Some(kind), Some(log)) = (OceanStageKind::from_id(&diag.stage), diag.file("log")) {
            notes.push(format!("progress {}", kind.progress(log)));
        }
        return notes;
    }
    for file in ["err", "nohup.out", "log"] {
        notes.extend(diag.tail(file, TAIL_LINES).into_iter().map(|l| format!("{file}: {l}")));
    }
    if notes.is_empty() {
        notes.push("no diagnostics available".to_string());
    }
    notes
}

pub fn sync(ws: &Workspace, args: InputArgs) -> Result<()> {
    let mut calc = ws.open(&args.input, false)?;
    let outcome = calc.sync();
    calc.save_state()?;
    let mut report = outcome?;

    let loaded = load_spectra(&mut report.results, calc.input())?;
    if loaded > 0 {
        let path = report.results.save()?;
        println!("{loaded} spectra written to {}", path.display());
    }
    let bytes: u64 = report.retrieved.iter().map(|r| r.bytes).sum();
    println!("retrieved {} file(s), {bytes} bytes", report.retrieved.len());
    if !report.outstanding_stages.is_empty() {
        println!("outstanding: {}", report.outstanding_stages.join(", "));
    }
    if let Some(err) = report.partial_error() {
        return Err(err.into());
    }
    println!("calculation {}: {}", calc.name(), calc.state());
    Ok(())
}

/// `VALUE` como JSON; si no parsea, string literal.
fn parse_override(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("override '{raw}' is not KEY=VALUE");
    };
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

pub fn fork(ws: &Workspace, args: ForkArgs) -> Result<PathBuf> {
    let file = InputFile::read(&args.input.input)?;
    let parent = file.specification(Arc::clone(&ws.vocabulary))?;
    let overrides = args.overrides.iter().map(|o| parse_override(o)).collect::<Result<Vec<_>>>()?;
    let child = parent.fork(&args.name, overrides)?;

    let out = args.output.unwrap_or_else(|| {
                              args.input
                                  .input
                                  .with_file_name(format!("{}.json", child.name()))
                          });
    let new_file = InputFile { name: child.name().to_string(),
                               params: child.params().clone().into_iter().collect(),
                               parent: Some(parent.name().to_string()) };
    fs::write(&out, serde_json::to_string_pretty(&new_file)?).with_context(|| format!("writing {}", out.display()))?;
    println!("{} forked from {} -> {}", child.name(), parent.name(), out.display());
    Ok(out)
}

pub fn render(ws: &Workspace, args: InputArgs) -> Result<()> {
    let input = ws.input(&args.input)?;
    print!("{}", write_ocean_input(&input)?);
    Ok(())
}
