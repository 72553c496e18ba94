//! Entorno remoto simulado en memoria.
//!
//! Guarda un árbol de archivos remoto, responde comandos con reglas por
//! subcadena (gana la última regla agregada que coincida) y registra todo
//! lo ejecutado y transferido. Los comandos `sbatch` sin regla reciben un job
//! id incremental y los envíos en background (`& echo $!`) un pid.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;

use super::{CommandOutput, RemoteFile, RemoteSession, TransferReport, TransferStatus};
use crate::errors::OrchestratorError;

struct Rule {
    pattern: String,
    output: CommandOutput,
}

struct Inner {
    open: bool,
    unreachable: bool,
    files: BTreeMap<String, Vec<u8>>,
    rules: Vec<Rule>,
    timeouts: Vec<String>,
    transfer_failures: HashMap<String, usize>,
    executed: Vec<String>,
    transfer_attempts: Vec<String>,
    uploaded: Vec<String>,
    next_job: u64,
}

pub struct InMemoryRemote {
    host: String,
    inner: Mutex<Inner>,
}

impl InMemoryRemote {
    pub fn new(host: &str) -> Self {
        Self { host: host.to_string(),
               inner: Mutex::new(Inner { open: true,
                                         unreachable: false,
                                         files: BTreeMap::new(),
                                         rules: Vec::new(),
                                         timeouts: Vec::new(),
                                         transfer_failures: HashMap::new(),
                                         executed: Vec::new(),
                                         transfer_attempts: Vec::new(),
                                         uploaded: Vec::new(),
                                         next_job: 1000 }) }
    }

    /// Responde `output` a todo comando que contenga `pattern`.
    pub fn respond(&self, pattern: &str, output: CommandOutput) {
        self.inner.lock().rules.push(Rule { pattern: pattern.to_string(), output });
    }

    /// Fija el estado que reporta el scheduler para un job.
    pub fn set_job_state(&self, job_id: &str, state: &str) {
        self.respond(&format!("-j {job_id} "), CommandOutput::ok(format!("{state}\n")));
    }

    /// Todo comando que contenga `pattern` excede su deadline.
    pub fn time_out(&self, pattern: &str) {
        self.inner.lock().timeouts.push(pattern.to_string());
    }

    pub fn clear_timeouts(&self) {
        self.inner.lock().timeouts.clear();
    }

    pub fn put_file(&self, path: &str, contents: impl AsRef<[u8]>) {
        self.inner.lock().files.insert(path.to_string(), contents.as_ref().to_vec());
    }

    pub fn remove_file(&self, path: &str) {
        self.inner.lock().files.remove(path);
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.lock().files.get(path).cloned()
    }

    /// Las próximas `times` descargas de `path` fallan.
    pub fn fail_transfer(&self, path: &str, times: usize) {
        self.inner.lock().transfer_failures.insert(path.to_string(), times);
    }

    /// Simula la pérdida de red: toda llamada falla con `UnreachableHost`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.lock().unreachable = unreachable;
    }

    pub fn executed(&self) -> Vec<String> {
        self.inner.lock().executed.clone()
    }

    pub fn count_executed(&self, pattern: &str) -> usize {
        self.inner.lock().executed.iter().filter(|c| c.contains(pattern)).count()
    }

    pub fn transfer_attempts(&self) -> Vec<String> {
        self.inner.lock().transfer_attempts.clone()
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.inner.lock().uploaded.clone()
    }

    fn check_session(&self, inner: &Inner) -> Result<(), OrchestratorError> {
        if inner.unreachable {
            return Err(OrchestratorError::UnreachableHost { host: self.host.clone(),
                                                            reason: "simulated network failure".into() });
        }
        if !inner.open {
            return Err(OrchestratorError::UnreachableHost { host: self.host.clone(),
                                                            reason: "session closed".into() });
        }
        Ok(())
    }
}

impl RemoteSession for InMemoryRemote {
    fn host(&self) -> &str {
        &self.host
    }

    fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput, OrchestratorError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        self.check_session(inner)?;
        inner.executed.push(command.to_string());
        if inner.timeouts.iter().any(|p| command.contains(p.as_str())) {
            return Err(OrchestratorError::CommandTimeout { command: command.to_string(),
                                                           timeout_ms: timeout.as_millis() as u64 });
        }
        if let Some(rule) = inner.rules.iter().rev().find(|r| command.contains(r.pattern.as_str())) {
            return Ok(rule.output.clone());
        }
        if command.contains("sbatch") {
            inner.next_job += 1;
            return Ok(CommandOutput::ok(format!("Submitted batch job {}\n", inner.next_job)));
        }
        if command.contains("echo $!") {
            inner.next_job += 1;
            return Ok(CommandOutput::ok(format!("{}\n", inner.next_job)));
        }
        Ok(CommandOutput::default())
    }

    fn transfer(&self,
                files: &[RemoteFile],
                local_dir: &Path,
                _timeout: Duration)
                -> Result<TransferReport, OrchestratorError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        self.check_session(inner)?;
        let mut report = TransferReport::default();
        for f in files {
            inner.transfer_attempts.push(f.remote.clone());
            let dest = local_dir.join(&f.local);
            if let Some(left) = inner.transfer_failures.get_mut(&f.remote) {
                if *left > 0 {
                    *left -= 1;
                    report.push(&f.remote, &dest, TransferStatus::Failed { reason: "injected transfer failure".into() });
                    continue;
                }
            }
            let status = match inner.files.get(&f.remote) {
                None => TransferStatus::Failed { reason: "no such file".into() },
                Some(bytes) => match write_local(&dest, bytes) {
                    Ok(()) => TransferStatus::Copied { bytes: bytes.len() as u64 },
                    Err(e) => TransferStatus::Failed { reason: e.to_string() },
                },
            };
            report.push(&f.remote, &dest, status);
        }
        Ok(report)
    }

    fn upload(&self, files: &[RemoteFile], _timeout: Duration) -> Result<TransferReport, OrchestratorError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        self.check_session(inner)?;
        let mut report = TransferReport::default();
        for f in files {
            let status = match fs::read(&f.local) {
                Ok(bytes) => {
                    let n = bytes.len() as u64;
                    inner.files.insert(f.remote.clone(), bytes);
                    inner.uploaded.push(f.remote.clone());
                    TransferStatus::Copied { bytes: n }
                }
                Err(e) => TransferStatus::Failed { reason: e.to_string() },
            };
            report.push(&f.remote, &f.local, status);
        }
        Ok(report)
    }

    fn close(&self) -> Result<(), OrchestratorError> {
        self.inner.lock().open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inner.lock().open
    }
}

fn write_local(dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(dest, bytes)
}
