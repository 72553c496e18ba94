//! Conexión SSH al entorno remoto.
//!
//! Usa los binarios `ssh`/`scp` del sistema (y `sshpass -e` cuando el secreto
//! es un password) con un socket `ControlMaster` compartido, así cada
//! llamada reutiliza la sesión autenticada en `open`.
//!
//! Invariantes:
//! - Cada llamada toma un mutex propio: varios cálculos pueden compartir la
//!   conexión, las llamadas se serializan.
//! - Un timeout mata el proceso local y devuelve `CommandTimeout`; la sesión
//!   maestra sigue viva y la conexión es reutilizable.
//! - `transfer`/`upload` reportan cada archivo por separado.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;
use shore_core::errors::OrchestratorError;
use shore_core::hashing::hash_str;
use shore_core::remote::{CommandOutput, RemoteFile, RemoteSession, TransferReport, TransferStatus};

use crate::credential::{Credential, Secret};
use crate::runner::{CommandRunner, Invocation, ProcessRunner, RunnerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    pub ssh_program: String,
    pub scp_program: String,
    pub sshpass_program: String,
    pub connect_timeout: Duration,
    pub control_persist: Duration,
    /// Directorio del socket de control.
    pub control_dir: PathBuf,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self { ssh_program: "ssh".into(),
               scp_program: "scp".into(),
               sshpass_program: "sshpass".into(),
               connect_timeout: Duration::from_secs(15),
               control_persist: Duration::from_secs(600),
               control_dir: std::env::temp_dir() }
    }
}

pub struct Connection {
    credential: Credential,
    options: SshOptions,
    runner: Arc<dyn CommandRunner>,
    control_path: PathBuf,
    call_lock: Mutex<()>,
    open: AtomicBool,
}

/// Exit code de `ssh` para errores propios (no del comando remoto).
const SSH_ERROR: i32 = 255;

const AUTH_MARKERS: &[&str] = &["Permission denied",
                                "Authentication failed",
                                "Too many authentication failures",
                                "Host key verification failed"];

/// Mensajes con que `ssh` (o su master) reporta un fallo de la sesión.
const SESSION_MARKERS: &[&str] = &["ssh: ",
                                   "Connection closed by",
                                   "Connection reset by",
                                   "Connection timed out",
                                   "Connection refused",
                                   "kex_exchange_identification",
                                   "mux_client",
                                   "ControlSocket",
                                   "Broken pipe"];

/// 255 es también un exit code válido de un comando remoto: solo cuenta
/// como fallo de la sesión si `ssh` lo dejó escrito en stderr.
fn is_session_failure(out: &CommandOutput) -> bool {
    out.exit_code == SSH_ERROR
    && out.stderr
          .lines()
          .any(|l| SESSION_MARKERS.iter().chain(AUTH_MARKERS).any(|m| l.contains(m)))
}

impl Connection {
    /// Abre la sesión con el runner de procesos real.
    pub fn open(credential: Credential, options: SshOptions) -> Result<Self, OrchestratorError> {
        Self::open_with_runner(credential, options, Arc::new(ProcessRunner))
    }

    /// Abre la sesión verificando la autenticación con `ssh ... true`.
    pub fn open_with_runner(credential: Credential,
                            options: SshOptions,
                            runner: Arc<dyn CommandRunner>)
                            -> Result<Self, OrchestratorError> {
        let key = format!("{}:{}", credential.destination(), credential.port.unwrap_or(22));
        let control_path = options.control_dir.join(format!("shore-{}", &hash_str(&key)[..16]));
        let conn = Self { credential,
                          options,
                          runner,
                          control_path,
                          call_lock: Mutex::new(()),
                          open: AtomicBool::new(false) };

        let handshake = conn.ssh_invocation("true");
        let out = match conn.runner.run(&handshake, conn.options.connect_timeout) {
            Ok(out) => out,
            Err(RunnerError::TimedOut) => {
                return Err(OrchestratorError::UnreachableHost { host: conn.credential.host.clone(),
                                                                reason: "connection timed out".into() })
            }
            Err(e) => return Err(OrchestratorError::Internal(e.to_string())),
        };
        if !out.success() {
            return Err(conn.classify(&out));
        }
        conn.open.store(true, Ordering::SeqCst);
        info!("connected to {}", conn.credential.destination());
        Ok(conn)
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Prefijo `sshpass -e` cuando el secreto es un password.
    fn base(&self, program: &str) -> Invocation {
        match &self.credential.secret {
            Secret::Password(pw) => Invocation::new(&self.options.sshpass_program).arg("-e")
                                                                                 .arg(program)
                                                                                 .env("SSHPASS", pw),
            _ => Invocation::new(program),
        }
    }

    fn common_options(&self, mut inv: Invocation, port_flag: &str) -> Invocation {
        if !matches!(self.credential.secret, Secret::Password(_)) {
            inv = inv.args(["-o", "BatchMode=yes"]);
        }
        inv = inv.arg("-o")
                 .arg(format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)))
                 .args(["-o", "ControlMaster=auto"])
                 .arg("-o")
                 .arg(format!("ControlPath={}", self.control_path.display()))
                 .arg("-o")
                 .arg(format!("ControlPersist={}", self.options.control_persist.as_secs()))
                 .args(["-o", "StrictHostKeyChecking=accept-new"]);
        if let Some(port) = self.credential.port {
            inv = inv.arg(port_flag).arg(port.to_string());
        }
        if let Secret::IdentityFile(path) = &self.credential.secret {
            inv = inv.arg("-i").arg(path.display().to_string());
        }
        inv
    }

    fn ssh_invocation(&self, command: &str) -> Invocation {
        let inv = self.common_options(self.base(&self.options.ssh_program), "-p");
        inv.arg(self.credential.destination()).arg(command)
    }

    fn scp_invocation(&self, from: String, to: String) -> Invocation {
        let inv = self.common_options(self.base(&self.options.scp_program), "-P");
        inv.arg("-q").arg(from).arg(to)
    }

    fn remote_spec(&self, path: &str) -> String {
        format!("{}:{}", self.credential.destination(), path)
    }

    /// Errores de `ssh` al establecer o usar la sesión.
    fn classify(&self, out: &CommandOutput) -> OrchestratorError {
        let stderr = out.stderr.trim().to_string();
        let via_sshpass = matches!(self.credential.secret, Secret::Password(_));
        let auth = (via_sshpass && (out.exit_code == 5 || out.exit_code == 6))
                   || AUTH_MARKERS.iter().any(|m| stderr.contains(m));
        if auth {
            OrchestratorError::Authentication { host: self.credential.host.clone(),
                                                user: self.credential.username.clone(),
                                                reason: if stderr.is_empty() { format!("exit {}", out.exit_code) } else { stderr } }
        } else {
            OrchestratorError::UnreachableHost { host: self.credential.host.clone(),
                                                 reason: if stderr.is_empty() { format!("exit {}", out.exit_code) } else { stderr } }
        }
    }

    fn ensure_open(&self) -> Result<(), OrchestratorError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(OrchestratorError::UnreachableHost { host: self.credential.host.clone(),
                                                     reason: "connection closed".into() })
        }
    }

    /// Copia archivo por archivo bajo un deadline común. `plan` devuelve
    /// origen, destino y la ruta local (de donde sale el tamaño).
    fn copy_each<F>(&self, files: &[RemoteFile], timeout: Duration, download: bool, mut plan: F) -> TransferReport
        where F: FnMut(&RemoteFile) -> (String, String, PathBuf)
    {
        let deadline = Instant::now() + timeout;
        let mut report = TransferReport::default();
        for f in files {
            let (from, to, local) = plan(f);
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                report.push(&f.remote, &local, TransferStatus::Failed { reason: "transfer deadline exceeded".into() });
                continue;
            }
            if let Some(parent) = local.parent().filter(|_| download) {
                if let Err(e) = fs::create_dir_all(parent) {
                    report.push(&f.remote, &local, TransferStatus::Failed { reason: e.to_string() });
                    continue;
                }
            }
            let status = match self.runner.run(&self.scp_invocation(from, to), remaining) {
                Ok(out) if out.success() => {
                    TransferStatus::Copied { bytes: fs::metadata(&local).map(|m| m.len()).unwrap_or(0) }
                }
                Ok(out) => TransferStatus::Failed { reason: failure_reason(&out) },
                Err(RunnerError::TimedOut) => TransferStatus::Failed { reason: "timed out".into() },
                Err(e) => TransferStatus::Failed { reason: e.to_string() },
            };
            if let TransferStatus::Failed { reason } = &status {
                warn!("transfer {} failed: {reason}", f.remote);
            }
            report.push(&f.remote, &local, status);
        }
        report
    }
}

fn failure_reason(out: &CommandOutput) -> String {
    let stderr = out.stderr.trim();
    if stderr.is_empty() {
        format!("exit {}", out.exit_code)
    } else {
        stderr.to_string()
    }
}

impl RemoteSession for Connection {
    fn host(&self) -> &str {
        &self.credential.host
    }

    fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput, OrchestratorError> {
        let _guard = self.call_lock.lock();
        self.ensure_open()?;
        debug!("ssh {}: {command}", self.credential.host);
        match self.runner.run(&self.ssh_invocation(command), timeout) {
            Ok(out) if is_session_failure(&out) => Err(self.classify(&out)),
            Ok(out) => Ok(out),
            Err(RunnerError::TimedOut) => Err(OrchestratorError::CommandTimeout { command: command.to_string(),
                                                                                  timeout_ms: timeout.as_millis() as u64 }),
            Err(e) => Err(OrchestratorError::Internal(e.to_string())),
        }
    }

    fn transfer(&self,
                files: &[RemoteFile],
                local_dir: &Path,
                timeout: Duration)
                -> Result<TransferReport, OrchestratorError> {
        let _guard = self.call_lock.lock();
        self.ensure_open()?;
        let report = self.copy_each(files, timeout, true, |f| {
                             let local = local_dir.join(&f.local);
                             (self.remote_spec(&f.remote), local.display().to_string(), local)
                         });
        info!("transfer from {}: {} ok, {} failed",
              self.credential.host,
              report.succeeded().count(),
              report.failed().count());
        Ok(report)
    }

    fn upload(&self, files: &[RemoteFile], timeout: Duration) -> Result<TransferReport, OrchestratorError> {
        let _guard = self.call_lock.lock();
        self.ensure_open()?;
        let report = self.copy_each(files, timeout, false, |f| {
                             (f.local.display().to_string(), self.remote_spec(&f.remote), f.local.clone())
                         });
        debug!("upload to {}: {} file(s)", self.credential.host, report.outcomes.len());
        Ok(report)
    }

    fn close(&self) -> Result<(), OrchestratorError> {
        let _guard = self.call_lock.lock();
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let inv = Invocation::new(&self.options.ssh_program).arg("-o")
                                                             .arg(format!("ControlPath={}", self.control_path.display()))
                                                             .args(["-O", "exit"])
                                                             .arg(self.credential.destination());
        if let Err(e) = self.runner.run(&inv, self.options.connect_timeout) {
            debug!("closing control master for {}: {e}", self.credential.host);
        }
        info!("disconnected from {}", self.credential.destination());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
         .field("destination", &self.credential.destination())
         .field("open", &self.is_open())
         .finish()
    }
}
